//! Graph terms and their byte encoding.

use crate::error::{CoreError, CoreResult};
use sha2::{Digest, Sha256};
use std::fmt;

const TAG_URI: u8 = 1;
const TAG_BLANK: u8 = 2;
const TAG_LITERAL: u8 = 3;

const LIT_PLAIN: u8 = 0;
const LIT_LANG: u8 = 1;
const LIT_TYPED: u8 = 2;

/// XSD integer datatype.
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
/// XSD decimal datatype.
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
/// XSD double datatype.
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
/// XSD string datatype.
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// Language tag or datatype of a literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LiteralKind {
    /// No tag.
    Plain,
    /// Language-tagged string.
    Lang(String),
    /// Typed literal with a datatype IRI.
    Typed(String),
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    /// IRI reference.
    Uri(String),
    /// Blank node label.
    Blank(String),
    /// Literal value.
    Literal {
        /// Lexical form.
        lexical: String,
        /// Language or datatype.
        kind: LiteralKind,
    },
}

impl Node {
    /// Creates an IRI node.
    pub fn uri(iri: impl Into<String>) -> Self {
        Self::Uri(iri.into())
    }

    /// Creates a blank node.
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank(label.into())
    }

    /// Creates a plain literal.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            kind: LiteralKind::Plain,
        }
    }

    /// Creates a language-tagged literal.
    pub fn lang_literal(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            kind: LiteralKind::Lang(lang.into()),
        }
    }

    /// Creates a typed literal.
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            kind: LiteralKind::Typed(datatype.into()),
        }
    }

    /// Creates an `xsd:integer` literal.
    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::typed_literal(value.to_string(), XSD_INTEGER)
    }

    /// Creates an `xsd:double` literal.
    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::typed_literal(value.to_string(), XSD_DOUBLE)
    }

    /// Numeric value of a numeric literal.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Literal {
                lexical,
                kind: LiteralKind::Typed(dt),
            } if dt == XSD_INTEGER || dt == XSD_DECIMAL || dt == XSD_DOUBLE => {
                lexical.trim().parse().ok()
            }
            _ => None,
        }
    }

    /// Integer value of an `xsd:integer` literal.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Literal {
                lexical,
                kind: LiteralKind::Typed(dt),
            } if dt == XSD_INTEGER => lexical.trim().parse().ok(),
            _ => None,
        }
    }

    /// Lexical form of a literal, or the IRI or label otherwise.
    #[must_use]
    pub fn lexical(&self) -> &str {
        match self {
            Self::Uri(s) | Self::Blank(s) => s,
            Self::Literal { lexical, .. } => lexical,
        }
    }

    /// Encodes the node for storage.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Uri(iri) => {
                out.push(TAG_URI);
                out.extend_from_slice(iri.as_bytes());
            }
            Self::Blank(label) => {
                out.push(TAG_BLANK);
                out.extend_from_slice(label.as_bytes());
            }
            Self::Literal { lexical, kind } => {
                out.push(TAG_LITERAL);
                put_str(&mut out, lexical);
                match kind {
                    LiteralKind::Plain => out.push(LIT_PLAIN),
                    LiteralKind::Lang(lang) => {
                        out.push(LIT_LANG);
                        put_str(&mut out, lang);
                    }
                    LiteralKind::Typed(dt) => {
                        out.push(LIT_TYPED);
                        put_str(&mut out, dt);
                    }
                }
            }
        }
        out
    }

    /// Decodes a node written by [`Node::encode`].
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let (&tag, rest) = bytes
            .split_first()
            .ok_or_else(|| CoreError::invalid_format("empty node record"))?;
        match tag {
            TAG_URI => Ok(Self::Uri(utf8(rest)?)),
            TAG_BLANK => Ok(Self::Blank(utf8(rest)?)),
            TAG_LITERAL => {
                let mut cursor = rest;
                let lexical = take_str(&mut cursor)?;
                let (&kind_tag, tail) = cursor
                    .split_first()
                    .ok_or_else(|| CoreError::invalid_format("literal missing kind"))?;
                cursor = tail;
                let kind = match kind_tag {
                    LIT_PLAIN => LiteralKind::Plain,
                    LIT_LANG => LiteralKind::Lang(take_str(&mut cursor)?),
                    LIT_TYPED => LiteralKind::Typed(take_str(&mut cursor)?),
                    other => {
                        return Err(CoreError::invalid_format(format!(
                            "unknown literal kind {other}"
                        )))
                    }
                };
                if !cursor.is_empty() {
                    return Err(CoreError::invalid_format("trailing bytes in literal"));
                }
                Ok(Self::Literal { lexical, kind })
            }
            other => Err(CoreError::invalid_format(format!("unknown node tag {other}"))),
        }
    }

    /// Content hash used to index the node.
    #[must_use]
    pub fn hash_key(&self) -> NodeKey {
        NodeKey::of_encoded(&self.encode())
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    // Term strings are far below 4 GiB.
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn take_str(cursor: &mut &[u8]) -> CoreResult<String> {
    if cursor.len() < 4 {
        return Err(CoreError::invalid_format("truncated string length"));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&cursor[..4]);
    let len = u32::from_le_bytes(raw) as usize;
    let body = cursor
        .get(4..4 + len)
        .ok_or_else(|| CoreError::invalid_format("truncated string"))?;
    let s = utf8(body)?;
    *cursor = &cursor[4 + len..];
    Ok(s)
}

fn utf8(bytes: &[u8]) -> CoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::invalid_format("node text is not UTF-8"))
}

fn escape(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(iri) => write!(f, "<{iri}>"),
            Self::Blank(label) => write!(f, "_:{label}"),
            Self::Literal { lexical, kind } => {
                f.write_str("\"")?;
                escape(lexical, f)?;
                f.write_str("\"")?;
                match kind {
                    LiteralKind::Plain => Ok(()),
                    LiteralKind::Lang(lang) => write!(f, "@{lang}"),
                    LiteralKind::Typed(dt) => write!(f, "^^<{dt}>"),
                }
            }
        }
    }
}

/// 128-bit content hash of an encoded node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey([u8; 16]);

impl NodeKey {
    /// Hashes an encoded node.
    #[must_use]
    pub fn of_encoded(encoded: &[u8]) -> Self {
        let digest = Sha256::digest(encoded);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_uses_ntriples_forms() {
        assert_eq!(Node::uri("http://ex/a").to_string(), "<http://ex/a>");
        assert_eq!(Node::blank("b0").to_string(), "_:b0");
        assert_eq!(Node::lang_literal("chat", "fr").to_string(), "\"chat\"@fr");
        assert_eq!(
            Node::integer(5).to_string(),
            format!("\"5\"^^<{XSD_INTEGER}>")
        );
        assert_eq!(Node::literal("a\"b").to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn numeric_values() {
        assert_eq!(Node::integer(-4).as_i64(), Some(-4));
        assert_eq!(Node::double(2.5).as_f64(), Some(2.5));
        assert_eq!(Node::literal("3").as_f64(), None);
        assert_eq!(Node::uri("3").as_f64(), None);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Node::decode(&[]).is_err());
        assert!(Node::decode(&[9, 1, 2]).is_err());
        assert!(Node::decode(&[TAG_LITERAL, 10, 0, 0, 0, b'a']).is_err());
    }

    #[test]
    fn distinct_nodes_have_distinct_keys() {
        assert_ne!(Node::uri("x").hash_key(), Node::blank("x").hash_key());
        assert_ne!(Node::literal("x").hash_key(), Node::lang_literal("x", "en").hash_key());
        assert_eq!(Node::uri("x").hash_key(), Node::uri("x").hash_key());
    }

    fn node_strategy() -> impl Strategy<Value = Node> {
        let text = "\\PC{0,12}";
        prop_oneof![
            text.prop_map(Node::uri),
            text.prop_map(Node::blank),
            text.prop_map(Node::literal),
            (text, "[a-z]{2}").prop_map(|(l, t)| Node::lang_literal(l, t)),
            (text, text).prop_map(|(l, t)| Node::typed_literal(l, t)),
        ]
    }

    proptest! {
        #[test]
        fn encoding_is_lossless(node in node_strategy()) {
            prop_assert_eq!(Node::decode(&node.encode()).unwrap(), node);
        }
    }
}
