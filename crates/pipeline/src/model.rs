use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use fastvlm_core::ModelComponent;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LoadError;

/// Subdirectory of a model directory holding the exported graphs.
pub const ONNX_DIR: &str = "onnx";

/// Quantization variant encoded in a model file name.
///
/// Ordered by preference: `Q4` beats `Fp16`, which beats `Int8`, which beats
/// the unsuffixed base export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    Base,
    Int8,
    Fp16,
    Q4,
}

impl ModelVariant {
    /// Variant of an `.onnx` file name; `None` for anything else.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if !name.ends_with(".onnx") {
            return None;
        }
        let variant = if name.ends_with("_q4.onnx") {
            Self::Q4
        } else if name.ends_with("_fp16.onnx") {
            Self::Fp16
        } else if name.ends_with("_int8.onnx") {
            Self::Int8
        } else {
            Self::Base
        };
        Some(variant)
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::Int8 => "int8",
            Self::Fp16 => "fp16",
            Self::Q4 => "q4",
        })
    }
}

/// Component a model file belongs to, matched on the file name prefix.
pub fn component_for_file(name: &str) -> Option<ModelComponent> {
    ModelComponent::ALL
        .into_iter()
        .find(|component| name.starts_with(component.session_name()))
}

/// Picks one file per component from `names`.
///
/// A later candidate only replaces the current pick when its variant is
/// strictly preferred, so ties keep the first name seen.
pub fn select_variants<'a, I>(names: I) -> BTreeMap<ModelComponent, (&'a str, ModelVariant)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut selected: BTreeMap<ModelComponent, (&'a str, ModelVariant)> = BTreeMap::new();
    for name in names {
        let (Some(component), Some(variant)) =
            (component_for_file(name), ModelVariant::from_file_name(name))
        else {
            debug!(file = name, "ignoring file that is not a model component");
            continue;
        };
        match selected.get(&component) {
            Some(&(_, current)) if variant <= current => {}
            _ => {
                debug!(file = name, %component, %variant, "selected model file");
                selected.insert(component, (name, variant));
            }
        }
    }
    selected
}

/// One chosen model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedModel {
    pub component: ModelComponent,
    pub file_name: String,
    pub path: PathBuf,
    pub variant: ModelVariant,
    pub size_bytes: Option<u64>,
}

impl fmt::Display for SelectedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.component, self.file_name, self.variant)?;
        if let Some(size) = self.size_bytes {
            write!(f, " {size} bytes")?;
        }
        Ok(())
    }
}

/// The three files a load will open, keyed by component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedModels {
    onnx_dir: PathBuf,
    models: BTreeMap<ModelComponent, SelectedModel>,
}

impl SelectedModels {
    pub fn onnx_dir(&self) -> &Path {
        &self.onnx_dir
    }

    pub fn get(&self, component: ModelComponent) -> Option<&SelectedModel> {
        self.models.get(&component)
    }

    pub fn path(&self, component: ModelComponent) -> Option<&Path> {
        self.get(component).map(|model| model.path.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedModel> {
        self.models.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.iter().filter_map(|model| model.size_bytes).sum()
    }
}

/// Scans `onnx_dir` and selects one file for each required component.
///
/// Names are visited in sorted order so the result does not depend on the
/// directory listing order.
pub fn discover_model_files(onnx_dir: &Path) -> Result<SelectedModels, LoadError> {
    if !onnx_dir.is_dir() {
        return Err(LoadError::OnnxDirNotFound(onnx_dir.to_path_buf()));
    }
    let read_err = |source| LoadError::ReadOnnxDir {
        path: onnx_dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(onnx_dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if !entry.file_type().map_err(read_err)?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    let selected = select_variants(names.iter().map(String::as_str));
    let mut models = BTreeMap::new();
    for component in ModelComponent::ALL {
        let Some(&(file_name, variant)) = selected.get(&component) else {
            return Err(LoadError::MissingModel(component));
        };
        let path = onnx_dir.join(file_name);
        let size_bytes = fs::metadata(&path).map(|meta| meta.len()).ok();
        info!(
            %component,
            file = file_name,
            %variant,
            size_bytes = ?size_bytes,
            "model file selected"
        );
        models.insert(
            component,
            SelectedModel {
                component,
                file_name: file_name.to_string(),
                path,
                variant,
                size_bytes,
            },
        );
    }

    Ok(SelectedModels {
        onnx_dir: onnx_dir.to_path_buf(),
        models,
    })
}
