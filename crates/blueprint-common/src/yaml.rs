//! Multi-document YAML decoding into untyped JSON values
//!
//! Manifests are decoded with yaml-rust2 and converted to `serde_json::Value`
//! so that the same object can be handed straight to the dynamic API.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::{Error, Result};

/// Decode every document in `input`, preserving file order.
///
/// Empty documents (a bare `---`, or a document that is only comments) are
/// dropped.
pub fn decode_documents(input: &str) -> Result<Vec<Value>> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::decode(e.to_string()))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|v| !matches!(v, Ok(Value::Null)))
        .collect()
}

fn yaml_to_json(yaml: Yaml) -> Result<Value> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::decode(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    other => {
                        return Err(Error::decode(format!(
                            "unsupported YAML key type: {:?}",
                            other
                        )))
                    }
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::decode("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::decode("bad YAML value")),
    }
}
