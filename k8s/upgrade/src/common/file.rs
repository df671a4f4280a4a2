use crate::common::error::{CreateDirectory, ReadingFile, Result, WriteFile, YamlSerialize};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use snafu::ResultExt;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// Create each of the directories, along with any missing parents.
pub fn create_directories<P>(directories: &[P]) -> Result<()>
where
    P: AsRef<Path>,
{
    for directory in directories {
        let path = directory.as_ref();
        fs::create_dir_all(path).context(CreateDirectory {
            path: path.to_path_buf(),
        })?;
        info!(path = %path.display(), "Created folder");
    }
    Ok(())
}

/// Serialize a Kubernetes object to '<directory>/<name>.yaml'. The fields which only describe
/// the object's server-side history (resourceVersion, managedFields) are left out so that the
/// file can be re-applied later. The input object is not modified.
pub fn write_object<K>(object: &K, directory: &Path) -> Result<PathBuf>
where
    K: Resource + Serialize + Clone,
{
    let name = object.name_any();
    let mut portable = object.clone();
    portable.meta_mut().managed_fields = None;
    portable.meta_mut().resource_version = None;

    let yaml = serde_yaml::to_string(&portable).context(YamlSerialize { name: name.clone() })?;
    let filepath = directory.join(format!("{name}.yaml"));
    write_file(&filepath, yaml.as_str())?;

    info!(file = %filepath.display(), "Created file");
    Ok(filepath)
}

/// Serialize each object to its own file in the directory, in order. Object names are expected
/// to be unique within the set.
pub fn write_objects<K>(objects: &[K], directory: &Path) -> Result<Vec<PathBuf>>
where
    K: Resource + Serialize + Clone,
{
    objects
        .iter()
        .map(|object| write_object(object, directory))
        .collect()
}

/// Write a string to a file, replacing any previous contents.
pub fn write_file(filepath: &Path, contents: &str) -> Result<()> {
    fs::write(filepath, contents).context(WriteFile {
        filepath: filepath.to_path_buf(),
    })
}

/// Read a whole file into a string.
pub fn read_file(filepath: &Path) -> Result<String> {
    fs::read_to_string(filepath).context(ReadingFile {
        filepath: filepath.to_path_buf(),
    })
}
