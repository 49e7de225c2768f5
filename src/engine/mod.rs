// Engine modules: content loading, I/O, timers, event loop, scene

pub mod assets;
pub mod event_loop;
pub mod io;
pub mod scene;
pub mod supervisor;
pub mod timer;
