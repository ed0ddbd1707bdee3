//! Embedded prompt templates rendered with minijinja.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;

const ANALYST_TEMPLATE: &str = include_str!("prompts/analyst.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REFLECTOR_TEMPLATE: &str = include_str!("prompts/reflector.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const SUPERVISOR_TEMPLATE: &str = include_str!("prompts/supervisor.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("analyst", ANALYST_TEMPLATE),
        ("coder", CODER_TEMPLATE),
        ("planner", PLANNER_TEMPLATE),
        ("reflector", REFLECTOR_TEMPLATE),
        ("reviewer", REVIEWER_TEMPLATE),
        ("supervisor", SUPERVISOR_TEMPLATE),
    ] {
        env.add_template(name, source)
            .expect("embedded template should be valid");
    }
    env
});

/// Render one of the embedded system prompts.
pub fn render(name: &str, ctx: impl Serialize) -> Result<String> {
    let template = ENGINE
        .get_template(name)
        .with_context(|| format!("unknown prompt template '{name}'"))?;
    template
        .render(ctx)
        .with_context(|| format!("render prompt template '{name}'"))
}
