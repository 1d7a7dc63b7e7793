// Outcome values carried into terminal chains and echo envelopes

use crate::value::Value;

/// Result of an operation: a numeric code (0 means success), a state key
/// that the localizer turns into text, and the arguments for that text.
#[derive(Debug, Clone, PartialEq)]
pub struct Res {
    code: i32,
    state: String,
    args: Vec<Value>,
}

impl Res {
    pub fn new(code: i32, state: impl Into<String>) -> Self {
        Self {
            code,
            state: state.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn ok() -> Self {
        Self::new(0, "ok")
    }

    /// A signed session is required.
    pub fn unsigned() -> Self {
        Self::new(401, "unsigned")
    }

    /// An authenticated session is required.
    pub fn unauthed() -> Self {
        Self::new(401, "unauthed")
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(400, "required").with_arg(field.into())
    }

    pub fn invalid(field: impl Into<String>) -> Self {
        Self::new(400, "invalid").with_arg(field.into())
    }

    pub fn not_found() -> Self {
        Self::new(404, "notfound")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(500, "error").with_arg(message.into())
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub fn is_fail(&self) -> bool {
        !self.is_ok()
    }
}

impl Default for Res {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_states() {
        assert!(Res::ok().is_ok());
        assert!(Res::unsigned().is_fail());
        assert_eq!(Res::unauthed().state(), "unauthed");
        assert_eq!(Res::required("id").args(), &[Value::from("id")]);
        assert_eq!(Res::invalid("id").code(), 400);
    }
}
