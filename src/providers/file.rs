//! `local:file` - files on disk

use super::{io_error, str_input};
use declarative::{Inputs, Outputs, ProviderError, ResourceProvider, StateRecord};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub struct FileProvider;

impl FileProvider {
    fn write(inputs: &Inputs) -> Result<Outputs, ProviderError> {
        let path = str_input(inputs, "path")?
            .ok_or_else(|| ProviderError::invalid("`path` is required"))?;
        let path = PathBuf::from(&*shellexpand::tilde(path));
        let content = str_input(inputs, "content")?.unwrap_or_default();

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(|e| io_error("create directory", &e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".strata")
            .tempfile_in(dir)
            .map_err(|e| io_error("create temp file", &e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| io_error("write", &e))?;
        tmp.persist(&path)
            .map_err(|e| io_error("persist", &e.error))?;

        log::debug!("wrote {} ({} bytes)", path.display(), content.len());

        let path = path.display().to_string();
        let digest = blake3::hash(content.as_bytes()).to_hex().to_string();
        Ok(Outputs::from([
            ("digest".to_string(), Value::String(digest)),
            ("id".to_string(), Value::String(path.clone())),
            ("path".to_string(), Value::String(path)),
            ("size".to_string(), Value::from(content.len())),
        ]))
    }

    fn remove(path: &str) -> Result<(), ProviderError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &e)),
        }
    }
}

/// Path recorded for a previously applied file
fn recorded_path(prior: &StateRecord) -> Option<&str> {
    prior
        .last_outputs
        .get("path")
        .or_else(|| prior.last_inputs.get("path"))
        .and_then(Value::as_str)
}

impl ResourceProvider for FileProvider {
    fn create(&self, _resource_type: &str, inputs: &Inputs) -> Result<Outputs, ProviderError> {
        Self::write(inputs)
    }

    fn update(
        &self,
        _resource_type: &str,
        inputs: &Inputs,
        prior: &StateRecord,
    ) -> Result<Outputs, ProviderError> {
        let outputs = Self::write(inputs)?;
        if let Some(old) = recorded_path(prior)
            && outputs.get("path").and_then(Value::as_str) != Some(old)
        {
            Self::remove(old)?;
        }
        Ok(outputs)
    }

    fn delete(&self, _resource_type: &str, prior: &StateRecord) -> Result<(), ProviderError> {
        match recorded_path(prior) {
            Some(path) => Self::remove(path),
            None => Ok(()),
        }
    }
}
