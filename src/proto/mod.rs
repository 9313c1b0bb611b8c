//! `LlmMetadata`: the protobuf payload stored in `llm_metadata` sections.
//!
//! The messages are declared directly with `prost` derives, so no build
//! script or `protoc` is needed.  Field numbers are part of the wire format
//! and must not change.

pub mod text;

pub use text::{parse_text, to_text, ProtoTextError};

#[derive(Clone, PartialEq, prost::Message)]
pub struct LlmMetadata {
    #[prost(message, optional, tag = "1")]
    pub start_token: Option<TokenUnion>,
    #[prost(message, repeated, tag = "2")]
    pub stop_tokens: Vec<TokenUnion>,
    #[prost(message, optional, tag = "3")]
    pub prompt_templates: Option<PromptTemplates>,
    #[prost(message, optional, tag = "4")]
    pub sampler_params: Option<SamplerParameters>,
    #[prost(int32, tag = "5")]
    pub max_num_tokens: i32,
}

/// A token given either as ids or as its string form.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenUnion {
    #[prost(oneof = "token_union::Token", tags = "1, 2")]
    pub token: Option<token_union::Token>,
}

pub mod token_union {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Token {
        #[prost(message, tag = "1")]
        TokenIds(super::TokenIds),
        #[prost(string, tag = "2")]
        TokenStr(String),
    }
}

impl TokenUnion {
    pub fn ids(ids: impl Into<Vec<i32>>) -> Self {
        Self { token: Some(token_union::Token::TokenIds(TokenIds { ids: ids.into() })) }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self { token: Some(token_union::Token::TokenStr(s.into())) }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenIds {
    #[prost(int32, repeated, tag = "1")]
    pub ids: Vec<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PromptTemplates {
    #[prost(message, optional, tag = "1")]
    pub user: Option<PromptAffixes>,
    #[prost(message, optional, tag = "2")]
    pub model: Option<PromptAffixes>,
    #[prost(message, optional, tag = "3")]
    pub system: Option<PromptAffixes>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PromptAffixes {
    #[prost(string, tag = "1")]
    pub prefix: String,
    #[prost(string, tag = "2")]
    pub suffix: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SamplerParameters {
    #[prost(enumeration = "sampler_parameters::Type", tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "2")]
    pub k: i32,
    #[prost(float, tag = "3")]
    pub p: f32,
    #[prost(float, tag = "4")]
    pub temperature: f32,
    #[prost(int32, tag = "5")]
    pub seed: i32,
}

pub mod sampler_parameters {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Unspecified = 0,
        TopK = 1,
        TopP = 2,
        Greedy = 3,
    }

    impl Type {
        /// Enumerator name as written in text format.
        pub fn as_str_name(self) -> &'static str {
            match self {
                Type::Unspecified => "TYPE_UNSPECIFIED",
                Type::TopK        => "TOP_K",
                Type::TopP        => "TOP_P",
                Type::Greedy      => "GREEDY",
            }
        }

        pub fn from_str_name(name: &str) -> Option<Self> {
            match name {
                "TYPE_UNSPECIFIED" => Some(Type::Unspecified),
                "TOP_K"            => Some(Type::TopK),
                "TOP_P"            => Some(Type::TopP),
                "GREEDY"           => Some(Type::Greedy),
                _                  => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn binary_roundtrip() {
        let meta = LlmMetadata {
            start_token: Some(TokenUnion::text("<bos>")),
            stop_tokens: vec![TokenUnion::ids([1, 107]), TokenUnion::text("<eos>")],
            prompt_templates: Some(PromptTemplates {
                user: Some(PromptAffixes { prefix: "<user>".into(), suffix: "</user>".into() }),
                ..Default::default()
            }),
            sampler_params: Some(SamplerParameters {
                r#type: sampler_parameters::Type::TopP as i32,
                p: 0.95,
                ..Default::default()
            }),
            max_num_tokens: 2048,
        };
        let bytes = meta.encode_to_vec();
        assert_eq!(LlmMetadata::decode(bytes.as_slice()).unwrap(), meta);
    }

    #[test]
    fn field_numbers_are_stable() {
        let meta = LlmMetadata { max_num_tokens: 1, ..Default::default() };
        // field 5, varint wire type, value 1
        assert_eq!(meta.encode_to_vec(), [0x28, 0x01]);
    }

    #[test]
    fn enum_names() {
        use sampler_parameters::Type;
        for t in [Type::Unspecified, Type::TopK, Type::TopP, Type::Greedy] {
            assert_eq!(Type::from_str_name(t.as_str_name()), Some(t));
        }
        assert_eq!(Type::try_from(3), Ok(Type::Greedy));
    }
}
