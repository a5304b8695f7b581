//! Locally synthesized reply text, used whenever no backend is configured or
//! a backend call fails. Formatting only; retries are nobody's job here.

pub fn echo(prompt: &str) -> String {
    format!("Echo: {prompt}")
}

pub fn backend_error(detail: &str) -> String {
    format!("Backend error: {detail}")
}
