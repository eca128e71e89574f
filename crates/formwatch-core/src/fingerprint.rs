//! Deterministic checksums over captured markup and extracted form structure.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::FormwatchResult;
use crate::models::{Fingerprint, FormDescriptor};

/// SHA-256 hex digest of a UTF-8 payload.
pub fn sha256_text(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checksum of the rendered document exactly as captured.
pub fn dom_checksum(html: &str) -> String {
    sha256_text(html)
}

/// Serialize `value` compactly with object keys sorted at every depth.
///
/// Array order is kept: forms, fields and submitters are order-significant.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Signature of an extraction result in its raw structured form.
pub fn form_signature_of_value(forms: &Value) -> String {
    sha256_text(&canonical_json(forms))
}

/// Signature of typed form descriptors.
pub fn form_signature(forms: &[FormDescriptor]) -> FormwatchResult<String> {
    let value = serde_json::to_value(forms)?;
    Ok(form_signature_of_value(&value))
}

/// Compute both checksums from the same capture.
pub fn fingerprint(html: &str, forms: &[FormDescriptor]) -> FormwatchResult<Fingerprint> {
    Ok(Fingerprint {
        dom_checksum: dom_checksum(html),
        form_signature: form_signature(forms)?,
    })
}
