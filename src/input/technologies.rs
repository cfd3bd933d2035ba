//! Code for reading the technology catalog.
use super::*;
use crate::technology::TechnologyFile;

const TECHNOLOGIES_FILE_NAME: &str = "technologies.yaml";

/// Read the technology catalog from `technologies.yaml`.
///
/// # Arguments
///
/// * `input_dir` - Folder containing the input catalogs
pub fn read_technologies(input_dir: &Path) -> Result<TechnologyCatalog> {
    let file_path = input_dir.join(TECHNOLOGIES_FILE_NAME);
    let file: TechnologyFile = read_yaml(&file_path)?;
    TechnologyCatalog::from_file(file)
        .with_context(|| format!("Error reading {}", file_path.display()))
}
