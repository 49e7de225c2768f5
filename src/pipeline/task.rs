// Conversion task: run the exporter for every source and write sheet files

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{convert_export, ConversionError};

/// Sources feeding one destination. `dest` has no extension; the task
/// writes `<dest>.png` and `<dest>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub sources: Vec<PathBuf>,
    pub dest: PathBuf,
}

/// Pair each source with `<out_dir>/<file stem>`.
///
/// Sources sharing a stem end up in the same pair, which the task rejects.
pub fn pairs_from_sources(sources: &[PathBuf], out_dir: &Path) -> Vec<FilePair> {
    let mut by_dest: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for source in sources {
        let stem = source.file_stem().unwrap_or(source.as_os_str());
        by_dest
            .entry(out_dir.join(stem))
            .or_default()
            .push(source.clone());
    }
    by_dest
        .into_iter()
        .map(|(dest, sources)| FilePair { sources, dest })
        .collect()
}

/// Produces a packed PNG and a JSON frame/tag description from a source file
pub trait Exporter {
    fn export(&self, input: &Path, png: &Path, data: &Path) -> Result<(), ConversionError>;
}

/// Runs the `aseprite` command line tool
#[derive(Debug, Clone)]
pub struct AsepriteCli {
    program: PathBuf,
}

impl AsepriteCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one export
    pub fn args(input: &Path, png: &Path, data: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--batch".into(), "--sheet".into()];
        args.push(png.into());
        args.extend(["--trim", "--shape-padding", "1", "--data"].map(OsString::from));
        args.push(data.into());
        args.extend(["--format", "json-array", "--list-tags"].map(OsString::from));
        args.push(input.into());
        args
    }
}

impl Default for AsepriteCli {
    fn default() -> Self {
        Self::new("aseprite")
    }
}

impl Exporter for AsepriteCli {
    fn export(&self, input: &Path, png: &Path, data: &Path) -> Result<(), ConversionError> {
        debug!("Running {} on \"{}\"", self.program.display(), input.display());
        let status = Command::new(&self.program)
            .args(Self::args(input, png, data))
            .status()
            .map_err(|e| ConversionError::Export {
                input: input.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(ConversionError::Export {
                input: input.to_path_buf(),
                reason: format!("exited with {}", status),
            });
        }
        Ok(())
    }
}

/// Converts every file pair, one after another
pub struct ConvertTask<E: Exporter> {
    pairs: Vec<FilePair>,
    exporter: E,
}

impl<E: Exporter> ConvertTask<E> {
    pub fn new(pairs: Vec<FilePair>, exporter: E) -> Self {
        Self { pairs, exporter }
    }

    /// Check that every destination has exactly one source
    pub fn validate(&self) -> Result<(), ConversionError> {
        for pair in &self.pairs {
            match pair.sources.len() {
                0 => return Err(ConversionError::MissingSource(pair.dest.clone())),
                1 => {}
                _ => {
                    let sources = pair
                        .sources
                        .iter()
                        .map(|source| format!("\"{}\"", source.display()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(ConversionError::ConflictingSources {
                        dest: pair.dest.clone(),
                        sources,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate, then convert each pair. Returns the JSON files written.
    pub fn run(&self) -> Result<Vec<PathBuf>, ConversionError> {
        if self.pairs.is_empty() {
            warn!("No .ase files were found to convert to sprite sheets");
            return Ok(Vec::new());
        }
        self.validate()?;

        let mut written = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            for source in &pair.sources {
                written.push(self.convert_file(source, &pair.dest)?);
            }
        }
        info!("Converted {} sprite sheets", written.len());
        Ok(written)
    }

    fn convert_file(&self, source: &Path, dest: &Path) -> Result<PathBuf, ConversionError> {
        let png = with_suffix(dest, ".png");
        let temp_json = with_suffix(dest, ".temp.json");
        let json = with_suffix(dest, ".json");

        if let Some(dir) = dest.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| ConversionError::io("create directory", dir, e))?;
        }

        // Stale outputs must never survive a failed export
        for stale in [&png, &temp_json, &json] {
            delete_if_exists(stale)?;
        }

        self.exporter.export(source, &png, &temp_json)?;
        ensure_exists(&png)?;
        ensure_exists(&temp_json)?;

        let export = fs::read_to_string(&temp_json)
            .map_err(|e| ConversionError::io("read", &temp_json, e))?;
        let sheet = convert_export(&export, source)?;
        let content = serde_json::to_string(&sheet).map_err(|e| ConversionError::Json {
            path: json.clone(),
            source: e,
        })?;
        fs::write(&json, content).map_err(|e| ConversionError::io("write", &json, e))?;
        delete_if_exists(&temp_json)?;

        info!(
            "Converted \"{}\" to \"{}\" ({} animations)",
            source.display(),
            json.display(),
            sheet.animations.len()
        );
        Ok(json)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn delete_if_exists(path: &Path) -> Result<(), ConversionError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted stale \"{}\"", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConversionError::io("delete", path, e)),
    }
}

fn ensure_exists(path: &Path) -> Result<(), ConversionError> {
    fs::metadata(path)
        .map(|_| ())
        .map_err(|e| ConversionError::io("find exported", path, e))
}
