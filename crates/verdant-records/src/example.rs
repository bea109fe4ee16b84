//! `Example` messages: a map of named feature lists.

use std::collections::HashMap;

pub const IMAGE_ENCODED: &str = "image/encoded";
pub const IMAGE_FORMAT: &str = "image/format";
pub const IMAGE_CLASS_LABEL: &str = "image/class/label";
pub const IMAGE_HEIGHT: &str = "image/height";
pub const IMAGE_WIDTH: &str = "image/width";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: HashMap<String, Feature>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

impl Feature {
    #[must_use]
    pub fn bytes(value: Vec<u8>) -> Self {
        Self { kind: Some(feature::Kind::BytesList(BytesList { value: vec![value] })) }
    }

    #[must_use]
    pub fn int64(value: i64) -> Self {
        Self { kind: Some(feature::Kind::Int64List(Int64List { value: vec![value] })) }
    }
}

impl Example {
    fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.as_ref()?.feature.get(key)
    }

    /// First bytes value stored under `key`.
    #[must_use]
    pub fn bytes_feature(&self, key: &str) -> Option<&[u8]> {
        match self.feature(key)?.kind.as_ref()? {
            feature::Kind::BytesList(list) => list.value.first().map(Vec::as_slice),
            _ => None,
        }
    }

    /// First int64 value stored under `key`.
    #[must_use]
    pub fn int64_feature(&self, key: &str) -> Option<i64> {
        match self.feature(key)?.kind.as_ref()? {
            feature::Kind::Int64List(list) => list.value.first().copied(),
            _ => None,
        }
    }
}

/// Build the example written for every converted image.
#[must_use]
pub fn image_example(encoded: Vec<u8>, format: &str, height: u32, width: u32, class_id: i64) -> Example {
    let mut feature = HashMap::new();
    feature.insert(IMAGE_ENCODED.to_string(), Feature::bytes(encoded));
    feature.insert(IMAGE_FORMAT.to_string(), Feature::bytes(format.as_bytes().to_vec()));
    feature.insert(IMAGE_CLASS_LABEL.to_string(), Feature::int64(class_id));
    feature.insert(IMAGE_HEIGHT.to_string(), Feature::int64(i64::from(height)));
    feature.insert(IMAGE_WIDTH.to_string(), Feature::int64(i64::from(width)));
    Example { features: Some(Features { feature }) }
}
