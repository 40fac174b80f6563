//! Operating modes and their fixed prompt templates.

use serde::{Deserialize, Serialize};

/// Role description and rules that open every prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTemplate {
    pub role_description: &'static str,
    pub rules: &'static str,
}

const PATIENT_INTAKE: ModeTemplate = ModeTemplate {
    role_description: "ROLE: You are an empathetic Intake Assistant for Physical Therapy.\n\
GOAL: Collect Subjective History and 'Way of Life' data (Job, Hobbies, Goals).",
    rules: "RULES: Use 6th-grade language. Do NOT diagnose. Ask 1 question at a time.",
};

const CLINICIAN_MENTOR: ModeTemplate = ModeTemplate {
    role_description: "ROLE: You are an expert Clinical Mentor (PT Specialist).\n\
GOAL: Analyze data, challenge diagnosis (Socratic method), and check Red Flags.",
    rules: "RULES: Use medical terminology. Cite JOSPT guidelines. \
Suggest specific Special Tests with Likelihood Ratios.",
};

/// The persona the assistant answers as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    PatientIntake,
    ClinicianMentor,
}

impl Mode {
    pub fn template(&self) -> ModeTemplate {
        match self {
            Mode::PatientIntake => PATIENT_INTAKE,
            Mode::ClinicianMentor => CLINICIAN_MENTOR,
        }
    }

    /// Label shown in the mode selector.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::PatientIntake => "Patient Intake",
            Mode::ClinicianMentor => "Clinician Mentor",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
