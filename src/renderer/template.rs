//! Per-target boilerplate as data
//!
//! A [`HostTemplate`] fixes everything about a generated host program that
//! does not depend on the kernel: headers, runtime setup, buffer creation,
//! kernel launch and teardown. The parts that do vary are filled in from
//! placeholders (`{kernel}`, `{i}`, `{type}`, `{bytes}`, ...) that only ever
//! carry the argument count, per-argument byte sizes and per-argument type
//! names, never argument contents.

use crate::renderer::LocalStyle;

/// Type used for the locally shaped copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalType {
    /// Native fixed-width C type (`int16_t`, `float`, ...)
    Native,
    /// Arbitrary-precision HLS type (`ap_fixed<16, 8>`, ...)
    Hls,
}

/// One piece of the `main` body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Fixed text, rendered with kernel-level variables
    Text(&'static str),
    Blank,
    /// Text repeated for every argument, chosen by argument role
    EachArg {
        tensor: &'static str,
        scalar: &'static str,
    },
    /// Shared-region attach, local declaration and unpack nest per argument
    Unpack,
    /// Pack nest and detach per tensor argument
    Pack,
}

/// Kernel-level variable built by joining a per-argument pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListVar {
    pub name: &'static str,
    pub tensor: &'static str,
    pub scalar: &'static str,
    pub separator: &'static str,
}

/// Cast applied to the right-hand side of copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    None,
    /// Native storage type in both directions
    Native,
    /// External fixed-point type on unpack, native type on pack
    External,
}

/// Complete description of a host program layout for one target
#[derive(Debug, Clone, Copy)]
pub struct HostTemplate {
    /// Host source file name
    pub host_file: &'static str,
    /// Separate kernel source file (`{kernel}` is substituted), if any
    pub kernel_file: Option<&'static str>,
    /// Embed the kernel body text into the host file after the prologue
    pub embed_kernel: bool,
    pub local_style: LocalStyle,
    pub local_type: LocalType,
    /// Prefix of local copies; the argument position is appended
    pub local_prefix: &'static str,
    pub cast: Cast,
    /// File-level text before `main`
    pub prologue: &'static str,
    /// Signature line of `main`, without the opening brace
    pub main_signature: &'static str,
    pub main_body: &'static [Section],
    /// File-level text after `main`
    pub epilogue: &'static str,
    pub lists: &'static [ListVar],
}

/// Placeholder values for template rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    vars: Vec<(String, String)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable
    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl ToString) {
        let value = value.to_string();
        match self.vars.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Merge `other` over `self`
    pub fn extend(&self, other: &TemplateVars) -> TemplateVars {
        let mut merged = self.clone();
        for (n, v) in &other.vars {
            merged.insert(n, v);
        }
        merged
    }

    /// Substitute every `{name}` occurrence; unknown braces are left alone
    ///
    /// Single pass over `template`: substituted values are never scanned
    /// again, so a value containing `{name}` text is emitted verbatim.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let known = tail[1..]
                .find('}')
                .and_then(|end| self.get(&tail[1..=end]).map(|v| (v, end + 2)));
            match known {
                Some((value, consumed)) => {
                    out.push_str(value);
                    rest = &tail[consumed..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_known_placeholders_only() {
        let vars = TemplateVars::new().set("i", 2).set("bytes", 48);
        assert_eq!(
            vars.render("cl_mem buffer_{i} = make({bytes}); if (x) { y(); }"),
            "cl_mem buffer_2 = make(48); if (x) { y(); }"
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let vars = TemplateVars::new()
            .set("call_args", "{kernel}, {i}")
            .set("kernel", "vadd")
            .set("i", 1);
        assert_eq!(
            vars.render("{kernel}({call_args}); // {i}"),
            "vadd({kernel}, {i}); // 1"
        );
        assert_eq!(vars.render("{{i}}"), "{1}");
        assert_eq!(vars.render("tail {"), "tail {");
    }

    #[test]
    fn test_set_replaces_existing() {
        let vars = TemplateVars::new().set("kernel", "a").set("kernel", "b");
        assert_eq!(vars.get("kernel"), Some("b"));
    }

    #[test]
    fn test_extend_overrides() {
        let base = TemplateVars::new().set("kernel", "k").set("i", 0);
        let merged = base.extend(&TemplateVars::new().set("i", 3));
        assert_eq!(merged.render("{kernel}:{i}"), "k:3");
    }
}
