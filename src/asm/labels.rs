//! Unique label generation.

/// Monotonic label source. Every label handed out is distinct for the
/// lifetime of one generator.
#[derive(Debug, Default)]
pub struct Labeller {
    counter: u32,
}

impl Labeller {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("-{}-{}", prefix, self.counter)
    }

    /// A family of related labels sharing one number, e.g. the test, body
    /// and end labels of a loop.
    pub fn group(&mut self, prefix: &str) -> LabelGroup {
        self.counter += 1;
        LabelGroup {
            stem: format!("-{}-{}", prefix, self.counter),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LabelGroup {
    stem: String,
}

impl LabelGroup {
    pub fn label(&self, part: &str) -> String {
        format!("{}-{}", self.stem, part)
    }
}
