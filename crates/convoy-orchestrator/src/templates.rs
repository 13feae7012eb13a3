//! Built-in workflow templates and template validation.

use crate::criteria::CriteriaTable;
use crate::types::{AgentRole, Phase, WorkflowTemplate};
use convoy_core::{ConvoyError, ConvoyResult};
use std::collections::HashSet;

/// Templates registered by default in the CLI.
pub fn default_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate::new(
            "game_development",
            vec![
                Phase::new("requirements", AgentRole::Analyst)
                    .with_criteria(["requirements_documented"])
                    .with_estimate(300, 900),
                Phase::new("design", AgentRole::Architect)
                    .depends_on(["requirements"])
                    .with_criteria(["design_approved"])
                    .with_estimate(600, 1_800),
                Phase::new("implementation", AgentRole::Developer)
                    .depends_on(["design"])
                    .with_criteria(["code_compiles"])
                    .with_estimate(1_800, 7_200),
                Phase::new("testing", AgentRole::Tester)
                    .depends_on(["implementation"])
                    .with_criteria(["tests_passing", "no_critical_issues"])
                    .with_estimate(600, 1_800),
                Phase::new("deployment", AgentRole::Deployer)
                    .depends_on(["testing"])
                    .with_criteria(["deployment_verified"])
                    .with_estimate(120, 600),
            ],
        )
        .with_description("Requirements through deployment for a game feature"),
        WorkflowTemplate::new(
            "bug_fix",
            vec![
                Phase::new("triage", AgentRole::Analyst).with_estimate(60, 300),
                Phase::new("fix", AgentRole::Developer)
                    .depends_on(["triage"])
                    .with_criteria(["code_compiles"])
                    .with_estimate(300, 1_800),
                Phase::new("verification", AgentRole::Tester)
                    .depends_on(["fix"])
                    .with_criteria(["tests_passing"])
                    .with_estimate(300, 900),
                Phase::new("review", AgentRole::Reviewer)
                    .depends_on(["fix"])
                    .with_criteria(["no_critical_issues"])
                    .with_estimate(120, 600),
            ],
        )
        .with_description("Triage, fix, verify and review a defect"),
    ]
}

/// Reject templates that could never run as declared.
pub fn validate(template: &WorkflowTemplate, criteria: &CriteriaTable) -> ConvoyResult<()> {
    if template.name.trim().is_empty() {
        return Err(ConvoyError::Config("template name is empty".into()));
    }
    if template.phases.is_empty() {
        return Err(ConvoyError::Config(format!(
            "template {} has no phases",
            template.name
        )));
    }
    let mut seen = HashSet::new();
    for phase in &template.phases {
        for dep in &phase.dependencies {
            if !seen.contains(dep.as_str()) {
                // Can never be satisfied; the run fails when it reaches this phase.
                tracing::warn!(
                    template = %template.name,
                    phase = %phase.name,
                    dependency = %dep,
                    "Dependency is not an earlier phase"
                );
            }
        }
        if let Some(unknown) = phase.success_criteria.iter().find(|c| !criteria.contains(c)) {
            return Err(ConvoyError::Config(format!(
                "phase {} of {} names unknown criterion {unknown}",
                phase.name, template.name
            )));
        }
        if !seen.insert(phase.name.as_str()) {
            return Err(ConvoyError::Config(format!(
                "duplicate phase {} in {}",
                phase.name, template.name
            )));
        }
    }
    Ok(())
}
