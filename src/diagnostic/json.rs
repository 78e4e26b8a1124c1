use crate::ast::SourceMap;
use super::{Diagnostic, Stage};

pub fn render(d: &Diagnostic) -> String {
    let severity = match d.stage {
        Stage::Fatal => "fatal",
        _ => "error",
    };

    let label = d.label.as_ref().map(|l| {
        let mut obj = serde_json::json!({
            "start": l.span.start,
            "end": l.span.end,
            "message": l.message,
        });
        if let Some(source) = &d.source {
            let (line, col) = SourceMap::new(source).lookup(l.span.start);
            obj["line"] = serde_json::Value::from(line);
            obj["col"] = serde_json::Value::from(col);
        }
        obj
    });

    let mut obj = serde_json::json!({
        "severity": severity,
        "stage": d.stage.as_str(),
        "message": d.message,
        "text": d.headline(),
        "notes": d.notes,
    });

    if let Some(line) = d.line {
        obj["line"] = serde_json::Value::from(line);
    }
    if let Some(label) = label {
        obj["label"] = label;
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"fatal","message":"internal error serializing diagnostic"}"#.to_string())
}
