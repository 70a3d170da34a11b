//! I/O 支持：JSON、RON 与 YAML 格式的模型读写，按扩展名选择格式。
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::net::model::NetModel;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron parse error: {0}")]
    RonSpanned(#[from] ron::error::SpannedError),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported model format `{0}` (expected json, ron, yaml or yml)")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Ron,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(Format::Json),
            "ron" => Ok(Format::Ron),
            "yaml" | "yml" => Ok(Format::Yaml),
            other => Err(IoError::UnsupportedFormat(other.to_string())),
        }
    }
}

pub fn to_json_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn from_json_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_str(s)?)
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let content = to_json_string(value)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T, IoError> {
    let content = fs::read_to_string(path)?;
    from_json_str(&content)
}

pub fn to_ron_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    let pretty = PrettyConfig::default().new_line("\n".to_string());
    Ok(ron::ser::to_string_pretty(value, pretty)?)
}

pub fn from_ron_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(ron::from_str(s)?)
}

pub fn parse_model(content: &str, format: Format) -> Result<NetModel, IoError> {
    match format {
        Format::Json => from_json_str(content),
        Format::Ron => from_ron_str(content),
        Format::Yaml => Ok(serde_yaml::from_str(content)?),
    }
}

pub fn read_model<P: AsRef<Path>>(path: P) -> Result<NetModel, IoError> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let content = fs::read_to_string(path)?;
    let mut model = parse_model(&content, format)?;
    if model.name.is_none() {
        model.name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string);
    }
    Ok(model)
}

pub fn write_model<P: AsRef<Path>>(path: P, model: &NetModel) -> Result<(), IoError> {
    let path = path.as_ref();
    let content = match Format::from_path(path)? {
        Format::Json => to_json_string(model)?,
        Format::Ron => to_ron_string(model)?,
        Format::Yaml => serde_yaml::to_string(model)?,
    };
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_formats_to_the_same_model() {
        let model = NetModel::new("chain")
            .place("p1", 1.0)
            .place("p2", 0.0)
            .transition("t1")
            .arc("p1", "t1")
            .arc("t1", "p2");

        let json = to_json_string(&model).unwrap();
        let ron = to_ron_string(&model).unwrap();
        let yaml = serde_yaml::to_string(&model).unwrap();

        assert_eq!(parse_model(&json, Format::Json).unwrap(), model);
        assert_eq!(parse_model(&ron, Format::Ron).unwrap(), model);
        assert_eq!(parse_model(&yaml, Format::Yaml).unwrap(), model);
    }

    #[test]
    fn defaults_fill_sparse_json() {
        let json = r#"{
            "places": [{"id": "p"}],
            "transitions": [{"id": "t", "kind": "timed"}],
            "arcs": [{"source": "p", "target": "t", "kind": "inhibitor"}]
        }"#;
        let model = parse_model(json, Format::Json).unwrap();
        assert_eq!(model.arcs[0].weight, 1);
        assert_eq!(model.places[0].tokens, 0.0);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(
            Format::from_path(Path::new("net.xml")),
            Err(IoError::UnsupportedFormat(_))
        ));
    }
}
