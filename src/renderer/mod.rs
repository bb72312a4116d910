//! Host program rendering
//!
//! - `index`: loop nests that copy between the flat shared buffer and the
//!   locally shaped array
//! - `template`: fixed per-target boilerplate represented as data
//! - `assembler`: composes both into complete source files

pub mod assembler;
pub mod index;
pub mod template;

pub use assembler::{GeneratedFile, GeneratedProgram, HostProgramAssembler};
pub use index::{CopyDirection, CopyNames, CopyNest, IndexEmitter, LocalStyle};
pub use template::{Cast, HostTemplate, ListVar, LocalType, Section, TemplateVars};

/// Line-oriented source builder with C-style indentation
#[derive(Debug, Clone)]
pub struct SourceWriter {
    buf: String,
    indent_level: usize,
    indent_size: usize,
}

impl Default for SourceWriter {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SourceWriter {
    pub fn new(indent_size: usize) -> Self {
        Self {
            buf: String::new(),
            indent_level: 0,
            indent_size,
        }
    }

    pub fn indent_level(&self) -> usize {
        self.indent_level
    }

    pub fn indent_size(&self) -> usize {
        self.indent_size
    }

    pub fn indent(&self) -> String {
        " ".repeat(self.indent_level * self.indent_size)
    }

    pub fn inc_indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dec_indent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Write one indented line
    pub fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.buf.push('\n');
            return;
        }
        self.buf.push_str(&self.indent());
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    /// Write every line of a multi-line block at the current indentation
    pub fn block(&mut self, text: &str) {
        for l in text.lines() {
            self.line(l);
        }
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    /// Append text verbatim, without indentation
    pub fn raw(&mut self, text: &str) {
        self.buf.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            self.buf.push('\n');
        }
    }

    /// `header {` and indent
    pub fn open(&mut self, header: &str) {
        self.line(&format!("{header} {{"));
        self.inc_indent();
    }

    /// Dedent and `}`
    pub fn close(&mut self) {
        self.dec_indent();
        self.line("}");
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_indentation() {
        let mut w = SourceWriter::new(2);
        w.open("int main()");
        w.line("return 0;");
        w.close();
        assert_eq!(w.finish(), "int main() {\n  return 0;\n}\n");
    }

    #[test]
    fn test_block_indents_each_line() {
        let mut w = SourceWriter::new(4);
        w.inc_indent();
        w.block("a;\nb;");
        assert_eq!(w.as_str(), "    a;\n    b;\n");
    }

    #[test]
    fn test_dec_indent_saturates() {
        let mut w = SourceWriter::new(2);
        w.dec_indent();
        assert_eq!(w.indent_level(), 0);
    }
}
