use std::fs;
use std::path::Path;
use tracing::debug;

use crate::app::CloudAssembly;
use crate::error::Result;

const TEMPLATE_SUFFIX: &str = ".template.json";
const NESTED_PREFIX: &str = "assembly-";

/// Writes the assembly under `out_dir`, nested assemblies into their own
/// subdirectories. Templates and nested assemblies left over from earlier
/// runs are removed first so the directory only describes this run.
pub fn write(out_dir: &Path, assembly: &CloudAssembly) -> Result<()> {
    let directory = match &assembly.directory {
        Some(name) => out_dir.join(name),
        None => out_dir.to_path_buf(),
    };
    if directory.is_dir() {
        remove_stale(&directory)?;
    }
    fs::create_dir_all(&directory)?;

    for artifact in &assembly.files {
        let path = directory.join(&artifact.file_name);
        let file_contents = serde_json::to_string_pretty(&artifact.contents)?;
        fs::write(&path, file_contents)?;
        debug!(path = %path.display(), "wrote artifact");
    }

    for nested in &assembly.nested {
        write(&directory, nested)?;
    }

    return Ok(());
}

fn remove_stale(directory: &Path) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        if path.is_dir() && name.starts_with(NESTED_PREFIX) {
            fs::remove_dir_all(&path)?;
            debug!(path = %path.display(), "removed stale assembly");
        } else if path.is_file() && name.ends_with(TEMPLATE_SUFFIX) {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed stale template");
        }
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::write;
    use crate::app::{Artifact, CloudAssembly};
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn artifact(file_name: &str, contents: Value) -> Artifact {
        Artifact {
            file_name: file_name.to_string(),
            contents,
        }
    }

    #[test]
    fn writes_nested_assemblies_into_subdirectories() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("cdk.out");

        let assembly = CloudAssembly {
            directory: None,
            files: vec![artifact("manifest.json", json!({ "version": "36.0.0" }))],
            nested: vec![CloudAssembly {
                directory: Some("assembly-AppDevStage".to_string()),
                files: vec![artifact("Stack.template.json", json!({ "Resources": {} }))],
                nested: Vec::new(),
            }],
        };

        let result = write(&out_dir, &assembly);
        assert_eq!(true, result.is_ok());

        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(out_dir.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(json!({ "version": "36.0.0" }), manifest);

        let template: Value = serde_json::from_str(
            &fs::read_to_string(out_dir.join("assembly-AppDevStage").join("Stack.template.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(json!({ "Resources": {} }), template);
    }

    #[test]
    fn removes_output_of_earlier_runs() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("cdk.out");
        fs::create_dir_all(out_dir.join("assembly-AppQaStage")).unwrap();
        fs::write(out_dir.join("assembly-AppQaStage").join("manifest.json"), "{}").unwrap();
        fs::write(out_dir.join("OldStack.template.json"), "{}").unwrap();
        fs::write(out_dir.join("notes.txt"), "kept").unwrap();

        let assembly = CloudAssembly {
            directory: None,
            files: vec![artifact("manifest.json", json!({}))],
            nested: vec![CloudAssembly {
                directory: Some("assembly-AppDevStage".to_string()),
                files: vec![artifact("Stack.template.json", json!({}))],
                nested: Vec::new(),
            }],
        };

        write(&out_dir, &assembly).unwrap();
        assert_eq!(false, out_dir.join("assembly-AppQaStage").exists());
        assert_eq!(false, out_dir.join("OldStack.template.json").exists());
        assert_eq!(true, out_dir.join("notes.txt").exists());
        assert_eq!(true, out_dir.join("assembly-AppDevStage").join("Stack.template.json").is_file());
    }

    #[test]
    fn fails_when_out_dir_is_a_file() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("cdk.out");
        fs::write(&out_dir, "not a directory").unwrap();

        let assembly = CloudAssembly {
            directory: None,
            files: vec![artifact("manifest.json", json!({}))],
            nested: Vec::new(),
        };

        match write(&out_dir, &assembly).err().unwrap() {
            crate::error::Error::Io(_) => {}
            _ => panic!("Expected `Io` error"),
        }
    }
}
