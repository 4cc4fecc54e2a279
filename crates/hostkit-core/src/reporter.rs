//! Progress reporting seam consumed by every staged operation in this
//! crate. HostKit has no daemon and no log aggregation of its own — each
//! operation is a single CLI invocation — so there is no `tracing`/`log`
//! dependency here; callers (the CLI, or a test) supply their own sink.

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Discards everything. Used by call sites (and tests) that only care
/// about the return value, not the narration.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

#[cfg(test)]
pub(crate) struct VecReporter {
    pub lines: Vec<String>,
}

#[cfg(test)]
impl VecReporter {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }
}

#[cfg(test)]
impl Reporter for VecReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(format!("[info] {msg}"));
    }
    fn warn(&mut self, msg: &str) {
        self.lines.push(format!("[warn] {msg}"));
    }
    fn error(&mut self, msg: &str) {
        self.lines.push(format!("[error] {msg}"));
    }
}
