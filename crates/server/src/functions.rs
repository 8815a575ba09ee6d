use anyhow::{anyhow, Result};
use cascade_core::{FunctionCatalog, Payload};
use serde_json::json;

/// Functions that graphs registered over HTTP can reference by name
pub fn builtin_catalog() -> FunctionCatalog {
    let mut catalog = FunctionCatalog::new();

    catalog.register_fn("identity", "Returns its input unchanged", |input| Ok(input));
    catalog.register_fn("split_words", "Splits a string on whitespace", |input| {
        Ok(json!(as_str(&input)?.split_whitespace().collect::<Vec<_>>()))
    });
    catalog.register_fn("split_lines", "Splits a string into lines", |input| {
        Ok(json!(as_str(&input)?.lines().collect::<Vec<_>>()))
    });
    catalog.register_fn("word_count", "Counts the words in a string", |input| {
        Ok(json!(as_str(&input)?.split_whitespace().count()))
    });
    catalog.register_fn("uppercase", "Uppercases a string", |input| {
        Ok(json!(as_str(&input)?.to_uppercase()))
    });
    catalog.register_fn("json_keys", "Lists the keys of an object", |input| {
        let object = input
            .as_object()
            .ok_or_else(|| anyhow!("expected an object"))?;
        Ok(json!(object.keys().collect::<Vec<_>>()))
    });
    catalog.register_fn("length", "Length of a string, list or object", length);

    catalog
}

fn as_str(input: &Payload) -> Result<&str> {
    input.as_str().ok_or_else(|| anyhow!("expected a string"))
}

fn length(input: Payload) -> Result<Payload> {
    let len = match &input {
        Payload::String(s) => s.chars().count(),
        Payload::Array(items) => items.len(),
        Payload::Object(fields) => fields.len(),
        other => return Err(anyhow!("no length for {}", other)),
    };
    Ok(json!(len))
}
