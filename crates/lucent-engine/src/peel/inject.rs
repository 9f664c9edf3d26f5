//! Fragment program instrumentation for depth peeling.
//!
//! [`instrument`] is a pure text transform:
//! - the peel uniform declarations are prepended;
//! - the discard test is inserted before every line-terminal `}`.
//!
//! Brace detection is purely textual and anchored at the end of the line. A
//! program that closes `shade` on a line with trailing text (or trailing
//! spaces) gets no discard test. One with a multi-line `struct` gets the
//! test inside the struct. Neither case is reported; peeling is just wrong
//! for that drawable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::scene::FragmentProgram;

/// First line of the prepended declarations.
pub const PEEL_UNIFORMS_BEGIN: &str = "// --- depth peeling uniforms (begin)";

/// First line of every inserted discard test.
pub const PEEL_DISCARD_BEGIN: &str = "// --- depth peeling discard (begin)";

const PEEL_UNIFORMS: &str = "\
// --- depth peeling uniforms (begin)
struct PeelUniforms {
    reciprocal_screen_size: vec2<f32>,
    epsilon: f32,
    _pad: f32,
};
@group(1) @binding(0) var<uniform> peel: PeelUniforms;
@group(1) @binding(1) var peel_prev_depth: texture_depth_2d;
// --- depth peeling uniforms (end)
";

// Starts with a newline so a brace sharing its line with code still gets the
// test on a line of its own.
const PEEL_DISCARD: &str = "
    // --- depth peeling discard (begin)
    let peel_screen_pos = frag_coord.xy * peel.reciprocal_screen_size;
    let peel_texel = vec2<i32>(peel_screen_pos * vec2<f32>(textureDimensions(peel_prev_depth)));
    if (textureLoad(peel_prev_depth, peel_texel, 0) + peel.epsilon >= frag_coord.z) {
        discard;
    }
    // --- depth peeling discard (end)
";

/// Result of instrumenting one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    pub source: String,
    /// Number of discard tests inserted.
    pub discard_sites: usize,
}

/// Adds the peel uniforms and discard tests to a fragment program.
pub fn instrument(source: &str) -> Instrumented {
    let mut body = String::with_capacity(PEEL_UNIFORMS.len() + source.len() + 4 * PEEL_DISCARD.len());
    body.push_str(PEEL_UNIFORMS);

    let mut discard_sites = 0;
    for line in source.split_inclusive('\n') {
        let (content, newline) = split_line_ending(line);
        match content.strip_suffix('}') {
            Some(head) => {
                body.push_str(head);
                body.push_str(PEEL_DISCARD);
                body.push('}');
                body.push_str(newline);
                discard_sites += 1;
            }
            None => body.push_str(line),
        }
    }

    Instrumented {
        source: body,
        discard_sites,
    }
}

/// Whether `source` contains at least one inserted discard test.
#[inline]
pub fn has_discard_test(source: &str) -> bool {
    source.contains(PEEL_DISCARD_BEGIN)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}

/// Caches instrumented variants by the content hash of their base program.
#[derive(Debug, Default)]
pub struct ShaderInjector {
    variants: HashMap<u64, Arc<str>>,
}

impl ShaderInjector {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the peeling variant of `program`'s base text.
    ///
    /// Identical base programs share one variant.
    pub fn variant(&mut self, program: &FragmentProgram) -> Arc<str> {
        let key = program.base_hash();
        if let Some(v) = self.variants.get(&key) {
            return v.clone();
        }

        let out = instrument(program.base());
        if out.discard_sites == 0 {
            log::warn!(
                "fragment program {key:016x} has no line-terminal '}}'; it will not be peeled"
            );
        }
        let variant: Arc<str> = out.source.into();
        self.variants.insert(key, variant.clone());
        variant
    }

    /// Number of distinct variants built so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::DEFAULT_FRAGMENT_PROGRAM;

    // ── instrument ────────────────────────────────────────────────────────

    #[test]
    fn prepends_uniforms() {
        let out = instrument(DEFAULT_FRAGMENT_PROGRAM);
        assert!(out.source.starts_with(PEEL_UNIFORMS_BEGIN));
        assert!(out.source.contains("var peel_prev_depth: texture_depth_2d"));
    }

    #[test]
    fn inserts_discard_before_closing_brace() {
        let out = instrument(DEFAULT_FRAGMENT_PROGRAM);
        assert_eq!(out.discard_sites, 1);
        assert!(has_discard_test(&out.source));

        let discard = out.source.find("discard;").unwrap();
        let assign = out.source.find("frag_color = draw.color;").unwrap();
        let close = out.source.rfind("\n}\n").unwrap();
        assert!(assign < discard && discard < close);
    }

    #[test]
    fn every_line_terminal_brace_gets_a_test() {
        let src = "fn shade(in: FragInput) {\n    if (true) {\n        frag_color = draw.color;\n    }\n}\n";
        assert_eq!(instrument(src).discard_sites, 2);
    }

    #[test]
    fn brace_followed_by_text_is_not_instrumented() {
        let src = "fn shade(in: FragInput) { frag_color = draw.color; } // done\n";
        let out = instrument(src);
        assert_eq!(out.discard_sites, 0);
        assert!(!has_discard_test(&out.source));
    }

    #[test]
    fn trailing_spaces_defeat_detection() {
        let src = "fn shade(in: FragInput) {\n    frag_color = draw.color;\n}   \n";
        assert_eq!(instrument(src).discard_sites, 0);
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        let src = "fn shade(in: FragInput) {\r\n    frag_color = draw.color;\r\n}\r\n";
        let out = instrument(src);
        assert_eq!(out.discard_sites, 1);
        assert!(out.source.ends_with("}\r\n"));
    }

    #[test]
    fn brace_on_last_line_without_newline() {
        let out = instrument("fn shade(in: FragInput) {\n}");
        assert_eq!(out.discard_sites, 1);
        assert!(out.source.ends_with('}'));
    }

    #[test]
    fn instrumenting_twice_doubles_the_tests() {
        // Instrumentation is not idempotent on its own output; callers keep the base text.
        let once = instrument(DEFAULT_FRAGMENT_PROGRAM).source;
        let twice = instrument(&once);
        assert!(twice.discard_sites > 1);
    }

    // ── ShaderInjector ────────────────────────────────────────────────────

    #[test]
    fn variants_are_cached_by_base_content() {
        let mut inj = ShaderInjector::new();
        let a = FragmentProgram::default();
        let b = FragmentProgram::default();

        let va = inj.variant(&a);
        let vb = inj.variant(&b);
        assert!(Arc::ptr_eq(&va, &vb));
        assert_eq!(inj.len(), 1);

        let c = FragmentProgram::new("fn shade(in: FragInput) {\n    frag_color = vec4<f32>(1.0);\n}\n");
        inj.variant(&c);
        assert_eq!(inj.len(), 2);
    }

    #[test]
    fn variant_ignores_existing_variant() {
        let mut inj = ShaderInjector::new();
        let mut p = FragmentProgram::default();
        let first = inj.variant(&p);
        p.set_variant(first.clone());
        let second = inj.variant(&p);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
