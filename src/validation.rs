//! JSON Schema validation for tool arguments and results.
//!
//! Covers the subset of JSON Schema that tool schemas (hand-written or
//! derived with `schemars`) actually use: `type`, `properties`,
//! `required`, `additionalProperties`, `items`, `enum`, `const`,
//! `minLength`/`maxLength`, `minimum`/`maximum`, `anyOf`/`oneOf`/`allOf`
//! and local `$ref` into `$defs`/`definitions`. Unknown keywords such as
//! `format`, `title` or `description` are ignored.

use serde_json::{Map, Value};

const MAX_REF_DEPTH: usize = 64;

/// Validate `instance` against `schema`, collecting every violation as
/// `"<path>: <problem>"`.
pub fn validate(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    SchemaValidator { root: schema }.check(schema, instance, "$", 0, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct SchemaValidator<'a> {
    root: &'a Value,
}

impl<'a> SchemaValidator<'a> {
    fn check(
        &self,
        schema: &'a Value,
        instance: &Value,
        path: &str,
        depth: usize,
        errors: &mut Vec<String>,
    ) {
        let schema = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                errors.push(format!("{path}: no value is allowed here"));
                return;
            }
            Value::Object(map) => map,
            _ => return,
        };

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            if depth >= MAX_REF_DEPTH {
                errors.push(format!("{path}: schema reference nesting too deep"));
                return;
            }
            match self.resolve(reference) {
                Some(target) => self.check(target, instance, path, depth + 1, errors),
                None => errors.push(format!("{path}: unresolvable reference '{reference}'")),
            }
        }

        if let Some(expected) = schema.get("type") {
            if !type_matches(expected, instance) {
                errors.push(format!(
                    "{path}: expected {}, got {}",
                    describe_type(expected),
                    json_type(instance)
                ));
                // Keyword checks below assume the right type.
                return;
            }
        }

        if let Some(options) = schema.get("enum").and_then(Value::as_array) {
            if !options.iter().any(|o| o == instance) {
                errors.push(format!("{path}: value is not one of the allowed options"));
            }
        }
        if let Some(constant) = schema.get("const") {
            if constant != instance {
                errors.push(format!("{path}: value must equal {constant}"));
            }
        }

        match instance {
            Value::String(s) => self.check_string(schema, s, path, errors),
            Value::Number(_) => self.check_number(schema, instance, path, errors),
            Value::Object(object) => self.check_object(schema, object, path, depth, errors),
            Value::Array(items) => {
                if let Some(item_schema) = schema.get("items") {
                    for (i, item) in items.iter().enumerate() {
                        self.check(item_schema, item, &format!("{path}[{i}]"), depth, errors);
                    }
                }
            }
            _ => {}
        }

        self.check_combinators(schema, instance, path, depth, errors);
    }

    fn check_string(&self, schema: &Map<String, Value>, s: &str, path: &str, errors: &mut Vec<String>) {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                errors.push(format!("{path}: shorter than {min} characters"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                errors.push(format!("{path}: longer than {max} characters"));
            }
        }
    }

    fn check_number(&self, schema: &Map<String, Value>, n: &Value, path: &str, errors: &mut Vec<String>) {
        let Some(n) = n.as_f64() else { return };
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{path}: must be >= {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{path}: must be <= {max}"));
            }
        }
    }

    fn check_object(
        &self,
        schema: &'a Map<String, Value>,
        object: &Map<String, Value>,
        path: &str,
        depth: usize,
        errors: &mut Vec<String>,
    ) {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    errors.push(format!("{path}: missing required property '{name}'"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        for (name, value) in object {
            let child = format!("{path}.{name}");
            match properties.and_then(|p| p.get(name)) {
                Some(property_schema) => self.check(property_schema, value, &child, depth, errors),
                None => match schema.get("additionalProperties") {
                    Some(Value::Bool(false)) => {
                        errors.push(format!("{path}: unexpected property '{name}'"))
                    }
                    Some(extra @ Value::Object(_)) => self.check(extra, value, &child, depth, errors),
                    _ => {}
                },
            }
        }
    }

    fn check_combinators(
        &self,
        schema: &'a Map<String, Value>,
        instance: &Value,
        path: &str,
        depth: usize,
        errors: &mut Vec<String>,
    ) {
        if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
            for sub in all {
                self.check(sub, instance, path, depth, errors);
            }
        }
        if let Some(any) = schema.get("anyOf").and_then(Value::as_array) {
            if !any.iter().any(|sub| self.passes(sub, instance, depth)) {
                errors.push(format!("{path}: does not match any allowed schema"));
            }
        }
        if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
            let matching = one.iter().filter(|sub| self.passes(sub, instance, depth)).count();
            if matching != 1 {
                errors.push(format!("{path}: must match exactly one schema, matched {matching}"));
            }
        }
    }

    fn passes(&self, schema: &'a Value, instance: &Value, depth: usize) -> bool {
        let mut scratch = Vec::new();
        self.check(schema, instance, "$", depth, &mut scratch);
        scratch.is_empty()
    }

    fn resolve(&self, reference: &str) -> Option<&'a Value> {
        if reference == "#" {
            return Some(self.root);
        }
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer)
    }
}

fn type_matches(expected: &Value, instance: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, instance),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| single_type_matches(name, instance)),
        _ => true,
    }
}

fn single_type_matches(name: &str, instance: &Value) -> bool {
    match name {
        "null" => instance.is_null(),
        "boolean" => instance.is_boolean(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => match instance {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "array" => instance.is_array(),
        "object" => instance.is_object(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
