//! The `module` block decoder.

use hcl::Value;
use hcl::value::Map;
use hcl_edit::structure::Block;
use peregrine_diagnostics::{Diagnostic, Diagnostics, SourceFiles};

use crate::ident::verify_block_labels;
use crate::schema::{
    BlockSchema, attr_value_span, attributes, block_type_span, eval_error_diag, evaluate,
    get_attr, missing_attr_diag,
};
use crate::scope::EvalScope;

const SCHEMA: BlockSchema = BlockSchema {
    attrs: &["source", "version"],
    blocks: &[],
};

/// A reusable engine module: a source, an optional version and a free-form
/// set of attributes that become the module call's inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub source: String,
    pub version: Option<String>,
    pub attrs: Map<String, Value>,
}

impl Module {
    pub(crate) fn decode(
        block: &Block,
        scope: &EvalScope,
        sources: &SourceFiles,
        filename: &str,
    ) -> (Option<Self>, Diagnostics) {
        let mut diags = verify_block_labels(block, sources, filename);

        let Some(name) = crate::schema::first_label(block) else {
            let diag = Diagnostic::error("module blocks require a name label");
            diags.push(sources.attach_snippet(
                diag,
                filename,
                &block_type_span(block),
                None,
            ));
            return (None, diags);
        };
        let name = name.to_string();

        diags.extend(SCHEMA.verify(block, sources, filename, true));

        let ctx = scope.context();
        let mut module = Module {
            name,
            ..Module::default()
        };

        match get_attr(&block.body, "source") {
            None => {
                diags.push(missing_attr_diag(block, "source", sources, filename));
                return (None, diags);
            }
            Some(attr) => match evaluate(&attr.value, &ctx) {
                Err(err) => {
                    diags.push(eval_error_diag(&err, attr, sources, filename, &ctx));
                    return (None, diags);
                }
                Ok(Value::String(source)) if !source.is_empty() => module.source = source,
                Ok(_) => {
                    let diag = Diagnostic::error("module source must be a non-empty string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                    return (None, diags);
                }
            },
        }

        if let Some(attr) = get_attr(&block.body, "version") {
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(Value::String(version)) => module.version = Some(version),
                Ok(_) => {
                    let diag = Diagnostic::error("module version must be a string");
                    diags.push(sources.attach_snippet(
                        diag,
                        filename,
                        &attr_value_span(attr),
                        None,
                    ));
                }
            }
        }

        // Everything else becomes a module input.
        for attr in attributes(&block.body) {
            let key = attr.key.as_str();
            if key == "source" || key == "version" {
                continue;
            }
            match evaluate(&attr.value, &ctx) {
                Err(err) => diags.push(eval_error_diag(&err, attr, sources, filename, &ctx)),
                Ok(value) => {
                    module.attrs.insert(key.to_string(), value);
                }
            }
        }

        (Some(module), diags)
    }

    /// The module as an evaluation-context value: source, version and inputs
    /// flattened into one object, so `module.<name>.<attr>` traversals
    /// evaluate naturally.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("source".to_string(), Value::from(self.source.clone()));
        if let Some(version) = &self.version {
            map.insert("version".to_string(), Value::from(version.clone()));
        }
        for (key, value) in &self.attrs {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Rebuilds a module from its flattened context value. Used by step
    /// decoding to take a bound copy of the referenced module.
    pub(crate) fn from_flattened(name: &str, map: &Map<String, Value>) -> Self {
        let mut module = Module {
            name: name.to_string(),
            ..Module::default()
        };
        for (key, value) in map {
            match (key.as_str(), value) {
                ("source", Value::String(source)) => module.source = source.clone(),
                ("version", Value::String(version)) => module.version = Some(version.clone()),
                _ => {
                    module.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_value_round_trips() {
        let mut attrs = Map::new();
        attrs.insert("driver".to_string(), Value::from("postgres"));
        let module = Module {
            name: "backend".to_string(),
            source: "./mods/backend".to_string(),
            version: Some("2.0.0".to_string()),
            attrs,
        };

        let value = module.to_value();
        let map = value.as_object().unwrap();
        assert_eq!(map.get("source"), Some(&Value::from("./mods/backend")));
        assert_eq!(map.get("driver"), Some(&Value::from("postgres")));

        let back = Module::from_flattened("backend", map);
        assert_eq!(back, module);
    }
}
