use crate::mock::item::{self, MockItemInfo};
use serde::Deserialize;
use serde_yaml::{Deserializer, Value as YamlValue};
use std::{
    fs::{read_dir, read_to_string},
    path::Path,
};
use thiserror::Error;

use crate::mock::persistence::Error::{DeserializationError, FileReadError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read from mock file: {0}")]
    FileReadError(String),
    #[error("cannot deserialize mock file: {0}")]
    DeserializationError(String),
    #[error("cannot register mock rule: {0}")]
    InvalidMockItem(#[from] item::Error),
}

/// Reads all `.yaml`, `.yml` and `.json` files of a directory (sorted by file name).
/// Each file holds a single rule or a list of rules; YAML files may hold several documents.
pub fn read_mock_files<P: AsRef<Path>>(dir: P) -> Result<Vec<MockItemInfo>, Error> {
    let dir = dir.as_ref();
    let entries = read_dir(dir).map_err(|err| {
        FileReadError(format!(
            "cannot list files in directory '{}': {}",
            dir.display(),
            err
        ))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| FileReadError(err.to_string()))?.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| matches!(ext, "yaml" | "yml" | "json"));
        if supported && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut infos = Vec::new();
    for path in paths {
        tracing::info!("Loading mock file from '{}'", path.to_string_lossy());

        let content = read_to_string(&path).map_err(|err| {
            FileReadError(format!("'{}': {}", path.to_string_lossy(), err))
        })?;

        infos.extend(deserialize_mock_items(&content)?);
    }

    Ok(infos)
}

/// Deserializes rules from YAML. Since JSON is a subset of YAML, JSON content is accepted too.
pub fn deserialize_mock_items(content: &str) -> Result<Vec<MockItemInfo>, Error> {
    let mut infos = Vec::new();

    for document in Deserializer::from_str(content) {
        let value =
            YamlValue::deserialize(document).map_err(|err| DeserializationError(err.to_string()))?;

        match value {
            YamlValue::Null => {}
            YamlValue::Sequence(values) => {
                for value in values {
                    infos.push(to_info(value)?);
                }
            }
            value => infos.push(to_info(value)?),
        }
    }

    Ok(infos)
}

fn to_info(value: YamlValue) -> Result<MockItemInfo, Error> {
    // Going through JSON values keeps the lenient field handling of MockItemInfo in one place.
    let value: serde_json::Value =
        serde_yaml::from_value(value).map_err(|err| DeserializationError(err.to_string()))?;
    serde_json::from_value(value).map_err(|err| DeserializationError(err.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::item::MockItem;

    #[test]
    fn deserialize_yaml_documents() {
        let yaml = r#"
url: /api/users
method: get
status: 201
body:
  - id: 1
---
- url: /api/a
  delay: 10
- url:
    regex: ^/api/b/\d+$
"#;
        let infos = deserialize_mock_items(yaml).unwrap();
        assert_eq!(infos.len(), 3);

        let item = MockItem::new(infos[0].clone()).unwrap();
        assert_eq!(item.key(), Some("/api/users-GET"));
        assert_eq!(item.status(), 201);

        let item = MockItem::new(infos[2].clone()).unwrap();
        assert!(item.url().map_or(false, |url| url.is_pattern()));
    }

    #[test]
    fn deserialize_json_content() {
        let json = r#"[{"url": "/a", "times": 2}, {"url": "/b", "header": {"x-a": "1"}}]"#;
        let infos = deserialize_mock_items(json).unwrap();

        assert_eq!(infos.len(), 2);
        assert_eq!(MockItem::new(infos[0].clone()).unwrap().times(), Some(2));
    }

    #[test]
    fn invalid_content_is_an_error() {
        assert!(matches!(
            deserialize_mock_items("url: [unclosed"),
            Err(DeserializationError(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(matches!(
            read_mock_files("/this/directory/does/not/exist"),
            Err(FileReadError(_))
        ));
    }
}
