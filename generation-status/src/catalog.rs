//! Phase catalog: the declarative list of user-facing phases
//!
//! A catalog is validated once at construction and never mutated. It is
//! either the built-in survey generation catalog or loaded from YAML:
//!
//! ```yaml
//! phases:
//!   - key: context
//!     label: Building Context
//!     sub_steps:
//!       - { key: load, label: Loading documents, backend_step_id: load_documents }
//!   - key: review
//!     label: Prompt Review
//!     conditional: true
//!     sub_steps:
//!       - { key: review, label: Awaiting review, backend_step_id: prompt_review }
//! ```

use anyhow::{Context, Result};
use generation_status_sdk::{PhaseDefinition, SubStepDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::CatalogError;

/// On-disk catalog layout
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    phases: Vec<PhaseDefinition>,
}

/// Validated, ordered list of phase definitions
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCatalog {
    phases: Vec<PhaseDefinition>,
}

impl PhaseCatalog {
    /// Validate and wrap a list of phases
    pub fn new(phases: Vec<PhaseDefinition>) -> Result<Self, CatalogError> {
        if phases.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut keys = HashSet::new();
        let mut steps = HashSet::new();
        let mut conditional: Option<&str> = None;

        for phase in &phases {
            if !keys.insert(phase.key.as_str()) {
                return Err(CatalogError::DuplicatePhaseKey(phase.key.clone()));
            }
            if phase.sub_steps.is_empty() {
                return Err(CatalogError::NoSubSteps(phase.key.clone()));
            }
            for sub_step in &phase.sub_steps {
                if !steps.insert(sub_step.backend_step_id.as_str()) {
                    return Err(CatalogError::DuplicateBackendStep(
                        sub_step.backend_step_id.clone(),
                    ));
                }
            }
            if phase.conditional {
                if let Some(existing) = conditional {
                    return Err(CatalogError::MultipleConditional(
                        existing.to_string(),
                        phase.key.clone(),
                    ));
                }
                conditional = Some(phase.key.as_str());
            }
        }

        Ok(Self { phases })
    }

    /// Parse a YAML catalog
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml.trim().trim_start_matches("---"))
            .context("Failed to parse catalog YAML")?;
        Ok(Self::new(file.phases)?)
    }

    /// Load a YAML catalog from disk
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_yaml_str(&yaml)
            .with_context(|| format!("Invalid catalog {}", path.display()))
    }

    /// `<config dir>/generation-status/catalog.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("generation-status").join("catalog.yaml"))
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// The human-review phase, if the catalog has one
    pub fn conditional_phase(&self) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.conditional)
    }

    /// Whether `backend_step_id` belongs to the human-review phase
    pub fn is_review_step(&self, backend_step_id: &str) -> bool {
        self.conditional_phase()
            .map(|p| p.owns_step(backend_step_id))
            .unwrap_or(false)
    }

    /// Backend step that marks the start of a run
    pub fn first_backend_step(&self) -> Option<&str> {
        self.phases
            .first()
            .and_then(|p| p.sub_steps.first())
            .map(|s| s.backend_step_id.as_str())
    }

    /// Built-in catalog for survey generation
    pub fn survey_generation() -> Self {
        let phase = |key: &str, label: &str, description: &str, conditional: bool, steps: &[(&str, &str, &str)]| {
            PhaseDefinition {
                key: key.to_string(),
                label: label.to_string(),
                description: description.to_string(),
                icon: None,
                sub_steps: steps
                    .iter()
                    .map(|(k, l, id)| SubStepDefinition::new(*k, *l, *id))
                    .collect(),
                percent_range: Default::default(),
                conditional,
            }
        };

        Self {
            phases: vec![
                phase(
                    "context",
                    "Building Context",
                    "Reading your documents and goals",
                    false,
                    &[
                        ("initialize", "Starting up", "initialize_workflow"),
                        ("documents", "Analyzing documents", "analyze_documents"),
                        ("context", "Building context", "build_context"),
                    ],
                ),
                phase(
                    "prompt_review",
                    "Prompt Review",
                    "Waiting for a reviewer to approve the generation prompt",
                    true,
                    &[
                        ("prepare", "Preparing prompt", "prepare_prompt_review"),
                        ("review", "Awaiting review", "prompt_review"),
                    ],
                ),
                phase(
                    "generation",
                    "Generating Questions",
                    "Drafting survey questions",
                    false,
                    &[
                        ("outline", "Outlining sections", "generate_outline"),
                        ("questions", "Writing questions", "generate_questions"),
                    ],
                ),
                phase(
                    "validation",
                    "Validating",
                    "Checking question quality",
                    false,
                    &[
                        ("validate", "Validating structure", "validate_survey"),
                        ("evaluate", "Evaluating quality", "evaluate_survey"),
                    ],
                ),
                phase(
                    "finalize",
                    "Finalizing",
                    "Saving the generated survey",
                    false,
                    &[
                        ("assemble", "Assembling survey", "finalize_survey"),
                        ("save", "Saving", "save_survey"),
                    ],
                ),
            ],
        }
    }
}

impl Default for PhaseCatalog {
    fn default() -> Self {
        Self::survey_generation()
    }
}
