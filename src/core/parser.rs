//! AL-004: Solution descriptor loading, validation, and argument parsing.
//!
//! Parses `solution.yml` and validates structural constraints:
//! - group, name, version non-empty and free of `:` `/` `\`
//! - argument names unique
//! - every binding carries exactly one of `value` / `from_arg`
//! - a solution with steps declares no parent

use super::error::{AlbumError, Result};
use super::types::*;
use crate::provenance::hasher;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Descriptor file name inside a solution package.
pub const DESCRIPTOR_FILE: &str = "solution.yml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Loads descriptors and exposes their hooks.
pub trait SolutionLoader: Send + Sync {
    /// Load from a package directory or a descriptor file.
    fn load(&self, path: &Path) -> Result<LoadedSolution>;
}

/// YAML loader for `solution.yml` packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorLoader;

impl SolutionLoader for DescriptorLoader {
    fn load(&self, path: &Path) -> Result<LoadedSolution> {
        load_solution(path)
    }
}

/// Descriptor file for a package directory, or the path itself for a file.
pub fn descriptor_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DESCRIPTOR_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Load and validate a descriptor from a package directory or file.
pub fn load_solution(path: &Path) -> Result<LoadedSolution> {
    let file = descriptor_path(path);
    let content = std::fs::read_to_string(&file).map_err(|e| AlbumError::io(&file, e))?;
    let descriptor = parse_descriptor(&content)?;
    let package_dir = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedSolution {
        descriptor,
        package_dir,
    })
}

/// Parse and validate a descriptor. The content hash defaults to the BLAKE3
/// of the descriptor text.
pub fn parse_descriptor(yaml: &str) -> Result<SolutionDescriptor> {
    let mut descriptor: SolutionDescriptor = serde_yaml_ng::from_str(yaml)
        .map_err(|e| AlbumError::Validation(format!("YAML parse error: {}", e)))?;
    let errors = validate_descriptor(&descriptor);
    if !errors.is_empty() {
        let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(AlbumError::Validation(joined.join("; ")));
    }
    if descriptor.metadata.hash.is_empty() {
        descriptor.metadata.hash = hasher::hash_string(yaml);
    }
    Ok(descriptor)
}

/// Validate a parsed descriptor. Returns a list of errors (empty = valid).
pub fn validate_descriptor(d: &SolutionDescriptor) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let meta = &d.metadata;

    for (field, value) in [
        ("group", &meta.group),
        ("name", &meta.name),
        ("version", &meta.version),
    ] {
        if let Err(message) = check_identifier(field, value) {
            errors.push(ValidationError { message });
        }
    }

    let mut seen = HashSet::new();
    for arg in &meta.args {
        if arg.name.is_empty() {
            errors.push(ValidationError {
                message: "argument with empty name".to_string(),
            });
        } else if !seen.insert(arg.name.as_str()) {
            errors.push(ValidationError {
                message: format!("argument '{}' declared twice", arg.name),
            });
        }
    }

    let parent = d.dependencies.as_ref().and_then(|dep| dep.parent.as_ref());
    if let Some(parent) = parent {
        if parent.handle().is_none() {
            errors.push(ValidationError {
                message: "parent needs resolve_solution or group, name and version".to_string(),
            });
        }
        for binding in &parent.args {
            if let Err(message) = binding.binding() {
                errors.push(ValidationError { message });
            }
        }
        if !d.steps.is_empty() {
            errors.push(ValidationError {
                message: "a solution with steps cannot declare a parent".to_string(),
            });
        }
    }

    let mut stack: Vec<&Step> = d.steps.iter().collect();
    while let Some(step) = stack.pop() {
        match step {
            Step::Group(inner) => stack.extend(inner.iter()),
            Step::Single(s) => {
                if s.solution.trim().is_empty() {
                    errors.push(ValidationError {
                        message: "step with empty solution handle".to_string(),
                    });
                }
                for binding in s.args.iter().chain(s.parent_args.iter()) {
                    if let Err(message) = binding.binding() {
                        errors.push(ValidationError {
                            message: format!("step '{}': {}", s.solution, message),
                        });
                    }
                }
            }
        }
    }

    errors
}

fn check_identifier(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    if value.contains([':', '/', '\\']) {
        return Err(format!(
            "{} '{}' must not contain ':', '/' or '\\'",
            field, value
        ));
    }
    Ok(())
}

/// Build parsed arguments from `--name=value` / `--name value` tokens.
/// Declared defaults fill gaps; a boolean flag without a value is `true`.
pub fn parse_args(args: &[Argument], raw: &[String]) -> Result<ParsedArgs> {
    let declared: IndexMap<&str, &Argument> = args.iter().map(|a| (a.name.as_str(), a)).collect();
    let mut given: IndexMap<String, String> = IndexMap::new();

    let mut i = 0;
    while i < raw.len() {
        let token = &raw[i];
        let Some(flag) = token.strip_prefix("--") else {
            return Err(AlbumError::Validation(format!(
                "unexpected positional argument '{}'",
                token
            )));
        };
        let (name, inline) = match flag.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (flag, None),
        };
        let Some(arg) = declared.get(name) else {
            return Err(AlbumError::Validation(format!("unknown argument '--{}'", name)));
        };
        let value = match inline {
            Some(v) => v,
            None => match raw.get(i + 1) {
                Some(next) if !next.starts_with("--") => {
                    i += 1;
                    next.clone()
                }
                _ if arg.arg_type == "boolean" => "true".to_string(),
                _ => {
                    return Err(AlbumError::Validation(format!(
                        "argument '--{}' needs a value",
                        name
                    )))
                }
            },
        };
        given.insert(name.to_string(), value);
        i += 1;
    }

    let mut parsed = IndexMap::new();
    for arg in args {
        match given.shift_remove(&arg.name).or_else(|| arg.default.clone()) {
            Some(v) => {
                parsed.insert(arg.name.clone(), v);
            }
            None if arg.required => {
                return Err(AlbumError::Validation(format!(
                    "missing required argument '--{}'",
                    arg.name
                )))
            }
            None => {}
        }
    }
    Ok(ParsedArgs(parsed))
}

/// Evaluate bindings against the top-level arguments into `(name, value)` pairs.
pub fn evaluate_bindings(
    bindings: &[ArgBinding],
    parsed: &ParsedArgs,
) -> Result<Vec<(String, String)>> {
    bindings
        .iter()
        .map(|b| -> Result<(String, String)> {
            let value = match b.binding().map_err(AlbumError::Validation)? {
                BindingValue::Literal(v) => v,
                BindingValue::FromArg(arg) => parsed
                    .get_argument(&arg)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        AlbumError::Validation(format!(
                            "binding '{}' refers to unset argument '{}'",
                            b.name, arg
                        ))
                    })?,
            };
            Ok((b.name.clone(), value))
        })
        .collect()
}

/// Render `(name, value)` pairs as `--name=value` tokens.
pub fn to_argv(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(k, v)| format!("--{}={}", k, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUR: &str = r#"
group: imaging
name: blur
version: 0.1.0
args:
  - name: input
    required: true
  - name: sigma
    type: float
    default: 1.0
  - name: verbose
    type: boolean
hooks:
  run: echo blur
"#;

    fn raw(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_al004_parse_valid() {
        let d = parse_descriptor(BLUR).unwrap();
        assert_eq!(d.metadata.name, "blur");
        assert!(d.metadata.hash.starts_with("blake3:"));
        assert_eq!(d.metadata.hash, hasher::hash_string(BLUR));
    }

    #[test]
    fn test_al004_explicit_hash_kept() {
        let yaml = "group: g\nname: n\nversion: '1'\nhash: blake3:given\n";
        assert_eq!(parse_descriptor(yaml).unwrap().metadata.hash, "blake3:given");
    }

    #[test]
    fn test_al004_bad_identifiers() {
        let yaml = "group: 'a:b'\nname: ''\nversion: 1/2\n";
        let err = parse_descriptor(yaml).unwrap_err().to_string();
        assert!(err.contains("group"));
        assert!(err.contains("name must not be empty"));
        assert!(err.contains("version"));
    }

    #[test]
    fn test_al004_duplicate_argument() {
        let yaml = "group: g\nname: n\nversion: '1'\nargs:\n  - name: a\n  - name: a\n";
        assert!(parse_descriptor(yaml)
            .unwrap_err()
            .to_string()
            .contains("declared twice"));
    }

    #[test]
    fn test_al004_steps_and_parent_conflict() {
        let yaml = r#"
group: g
name: n
version: '1'
dependencies:
  parent:
    resolve_solution: g:p:1
steps:
  - solution: g:a:1
"#;
        assert!(parse_descriptor(yaml)
            .unwrap_err()
            .to_string()
            .contains("cannot declare a parent"));
    }

    #[test]
    fn test_al004_nested_binding_checked() {
        let yaml = r#"
group: g
name: n
version: '1'
steps:
  - - solution: g:a:1
      args:
        - name: x
"#;
        assert!(parse_descriptor(yaml)
            .unwrap_err()
            .to_string()
            .contains("needs a value or from_arg"));
    }

    #[test]
    fn test_al004_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DESCRIPTOR_FILE), BLUR).unwrap();
        let loaded = DescriptorLoader.load(dir.path()).unwrap();
        assert_eq!(loaded.package_dir, dir.path());
        assert_eq!(loaded.hook(Hook::Run), Some("echo blur"));
        assert_eq!(loaded.hook(Hook::Install), None);
    }

    #[test]
    fn test_al004_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_solution(dir.path()),
            Err(AlbumError::Io { .. })
        ));
    }

    #[test]
    fn test_al004_parse_args_forms_and_defaults() {
        let d = parse_descriptor(BLUR).unwrap();
        let parsed = parse_args(&d.metadata.args, &raw(&["--input", "a.tif", "--verbose"])).unwrap();
        assert_eq!(parsed.get_argument("input"), Some("a.tif"));
        assert_eq!(parsed.get_argument("sigma"), Some("1.0"));
        assert_eq!(parsed.get_argument("verbose"), Some("true"));

        let parsed = parse_args(&d.metadata.args, &raw(&["--sigma=2", "--input=b"])).unwrap();
        let order: Vec<_> = parsed.0.keys().cloned().collect();
        assert_eq!(order, vec!["input", "sigma"]);
        assert_eq!(parsed.get_argument("sigma"), Some("2"));
    }

    #[test]
    fn test_al004_parse_args_errors() {
        let d = parse_descriptor(BLUR).unwrap();
        let args = &d.metadata.args;
        assert!(parse_args(args, &[]).unwrap_err().to_string().contains("missing required"));
        assert!(parse_args(args, &raw(&["--input=a", "--nope=1"]))
            .unwrap_err()
            .to_string()
            .contains("unknown argument"));
        assert!(parse_args(args, &raw(&["stray"])).is_err());
        assert!(parse_args(args, &raw(&["--input"])).is_err());
    }

    #[test]
    fn test_al004_evaluate_bindings() {
        let parsed = ParsedArgs(IndexMap::from([("input".to_string(), "a.tif".to_string())]));
        let pairs = evaluate_bindings(
            &[ArgBinding::literal("mode", "fast"), ArgBinding::from_arg("file", "input")],
            &parsed,
        )
        .unwrap();
        assert_eq!(
            to_argv(&pairs),
            vec!["--mode=fast".to_string(), "--file=a.tif".to_string()]
        );
        assert!(evaluate_bindings(&[ArgBinding::from_arg("f", "missing")], &parsed).is_err());
    }
}
