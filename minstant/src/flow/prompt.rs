//! System instruction rendering.

use minijinja::{context, Environment};

use crate::models::Identity;

const TEMPLATE_NAME: &str = "system_prompt";
const TEMPLATE_SOURCE: &str = include_str!("system_prompt.md.jinja");

/// Renders the fixed system instruction with the caller's runtime context.
pub struct SystemPrompt {
    env: Environment<'static>,
}

impl SystemPrompt {
    /// Compile the embedded template.
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template(TEMPLATE_NAME, TEMPLATE_SOURCE)?;
        Ok(Self { env })
    }

    /// Render for one turn. Missing values are written as `null`.
    pub fn render(&self, identity: Option<&Identity>) -> Result<String, minijinja::Error> {
        let identity = identity.cloned().unwrap_or_default();
        let user_id = if identity.caller_id.is_empty() {
            null()
        } else {
            identity.caller_id
        };

        self.env.get_template(TEMPLATE_NAME)?.render(context! {
            user_id => user_id,
            full_name => identity.display_name.unwrap_or_else(null),
            lat => identity.lat.map_or_else(null, |v| v.to_string()),
            lng => identity.long.map_or_else(null, |v| v.to_string()),
        })
    }
}

fn null() -> String {
    "null".to_string()
}
