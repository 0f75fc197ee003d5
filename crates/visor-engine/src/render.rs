//! Minimal `{{ path.to.field }}` substitution for a check's `with` block
//! (spec §4.C: "template-rendered fields ... with access to `pr`,
//! `outputs[name]`, `env`, `args`, and ... `item`").
//!
//! This is deliberately tiny: a dotted-path lookup into a fixed context
//! object, not a general template language. `visor-expr` is the sandboxed
//! evaluator for anything that needs real expressiveness (`if`, `fail_if`,
//! `forEach`, routing `_js` fields).

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub pr: Value,
    pub outputs: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub item: Option<Value>,
}

impl TemplateContext {
    fn root(&self) -> Value {
        serde_json::json!({
            "pr": self.pr,
            "outputs": self.outputs,
            "env": self.env,
            "item": self.item,
        })
    }
}

/// Recursively renders every string leaf in `value`. A string that is
/// *entirely* one placeholder (`"{{a.b}}"`) is replaced by the looked-up
/// value as-is (preserving type); a string with embedded placeholders
/// (`"hello {{name}}"`) is rendered to text, missing paths becoming `""`.
pub fn render(value: &Value, ctx: &TemplateContext) -> Value {
    match value {
        Value::String(s) => render_string(s, &ctx.root()),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(template: &str, root: &Value) -> Value {
    if let Some(path) = whole_placeholder(template) {
        return lookup(root, path).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = after[..end].trim();
        let resolved = lookup(root, path)
            .map(value_to_display)
            .unwrap_or_default();
        out.push_str(&resolved);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn whole_placeholder(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if template.trim_start().starts_with("{{") && template.trim_end().ends_with("}}") {
        Some(inner.trim())
    } else {
        None
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        TemplateContext {
            pr: json!({"number": 42}),
            outputs: HashMap::from([("build".to_string(), json!({"ok": true}))]),
            env: HashMap::from([("STAGE".to_string(), "prod".to_string())]),
            item: Some(json!("x")),
        }
    }

    #[test]
    fn whole_placeholder_preserves_type() {
        let rendered = render(&json!("{{ outputs.build }}"), &ctx());
        assert_eq!(rendered, json!({"ok": true}));
    }

    #[test]
    fn embedded_placeholder_renders_to_text() {
        let rendered = render(&json!("PR #{{pr.number}} on {{env.STAGE}}"), &ctx());
        assert_eq!(rendered, json!("PR #42 on prod"));
    }

    #[test]
    fn missing_path_renders_empty() {
        let rendered = render(&json!("value: {{outputs.missing}}"), &ctx());
        assert_eq!(rendered, json!("value: "));
    }

    #[test]
    fn nested_objects_are_rendered_recursively() {
        let rendered = render(&json!({"msg": "item is {{item}}"}), &ctx());
        assert_eq!(rendered, json!({"msg": "item is x"}));
    }
}
