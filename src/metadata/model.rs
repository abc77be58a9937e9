//! Typed view over the decoded effect document.
//!
//! Field names follow the embedded JSON (`descript`, `effect`, `datas`). The effect table keeps
//! document order so that "first match wins" lookups are stable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::composite::layout::AlphaLayout;
use crate::foundation::core::{PixelRect, Size};
use crate::foundation::error::{DualframeError, DualframeResult};

/// Frame-level description of the dual-channel video.
///
/// Fields keep the JSON value they were written with, so producers that emit `750.0` for a
/// width or `0` for `hasAudio` still load and serialize back unchanged. The accessors read them
/// leniently: a missing, `null` or unusable value gives the default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Output (color) width in pixels.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub width: Option<Value>,
    /// Output (color) height in pixels.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub height: Option<Value>,
    /// Effect flag; only `1` marks a valid document.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub is_effect: Option<Value>,
    /// Producer version.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    /// Color sub-frame placement, usually `[x, y, w, h]`.
    #[serde(
        rename = "rgbFrame",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub color_frame: Option<Value>,
    /// Alpha sub-frame placement, usually `[x, y, w, h]`.
    #[serde(
        rename = "alphaFrame",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub alpha_frame: Option<Value>,
    /// Frames per second.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub fps: Option<Value>,
    /// Whether the video carries an audio track.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<Value>,
    /// Any additional producer fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keeps an explicit `null` apart from an absent field.
fn present<'de, D>(de: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(de).map(Some)
}

impl Descriptor {
    /// True if the document declares itself an effect document (`isEffect == 1`).
    pub fn is_effect(&self) -> bool {
        self.is_effect.as_ref().and_then(Value::as_f64) == Some(1.0)
    }

    /// Declared width, 0 when missing or not a pixel count.
    pub fn width(&self) -> u32 {
        lenient_u32(self.width.as_ref()).unwrap_or(0)
    }

    /// Declared height, 0 when missing or not a pixel count.
    pub fn height(&self) -> u32 {
        lenient_u32(self.height.as_ref()).unwrap_or(0)
    }

    /// Frames per second, 0.0 when missing.
    pub fn fps(&self) -> f64 {
        lenient_f64(self.fps.as_ref())
            .filter(|f| f.is_finite() && *f >= 0.0)
            .unwrap_or(0.0)
    }

    /// Audio flag. Numbers count as true when non-zero.
    pub fn has_audio(&self) -> bool {
        match self.has_audio.as_ref() {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
            _ => false,
        }
    }

    /// Producer version as text.
    pub fn version(&self) -> Option<String> {
        match self.version.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Declared output size, if both dimensions are non-zero.
    pub fn size(&self) -> Option<Size> {
        Size::new(self.width(), self.height()).ok()
    }

    /// Color sub-frame rectangle inside the packed video frame.
    pub fn color_rect(&self) -> Option<PixelRect> {
        rect_from_value(self.color_frame.as_ref()?)
    }

    /// Alpha sub-frame rectangle inside the packed video frame.
    pub fn alpha_rect(&self) -> Option<PixelRect> {
        rect_from_value(self.alpha_frame.as_ref()?)
    }

    /// Packed-frame layout described by `rgbFrame` / `alphaFrame`.
    pub fn alpha_layout(&self) -> Option<AlphaLayout> {
        let color = self.color_rect()?;
        let alpha = self.alpha_rect()?;
        Some(AlphaLayout::Regions { color, alpha })
    }
}

/// Number, or a string holding one.
fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative whole number that fits in `u32`; `750.0` is accepted, `1.5` is not.
fn lenient_u32(v: Option<&Value>) -> Option<u32> {
    let n = lenient_f64(v)?;
    (n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX)).then_some(n as u32)
}

fn lenient_u64(v: Option<&Value>) -> Option<u64> {
    if let Some(Value::Number(n)) = v
        && let Some(u) = n.as_u64()
    {
        return Some(u);
    }
    let n = lenient_f64(v)?;
    // 2^64 itself is not representable.
    (n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n < 18_446_744_073_709_551_616.0)
        .then_some(n as u64)
}

fn rect_from_value(v: &Value) -> Option<PixelRect> {
    let arr = v.as_array()?;
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0u32; 4];
    for (slot, item) in out.iter_mut().zip(arr) {
        let n = item.as_f64()?;
        if !n.is_finite() || n < 0.0 || n > f64::from(u32::MAX) {
            return None;
        }
        *slot = n.round() as u32;
    }
    let rect = PixelRect::new(out[0], out[1], out[2], out[3]);
    (!rect.is_empty()).then_some(rect)
}

/// Kind of a dynamic element, parsed from `effectType`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectKind {
    /// Replaceable text (`"txt"`).
    Text,
    /// Replaceable image (`"img"`).
    Image,
    /// Anything else, including a missing type.
    Other(String),
}

/// One effect definition from the `effect` table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectDef {
    /// Producer-assigned id, number or string.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub effect_id: Option<Value>,
    /// `"txt"`, `"img"` or another producer type.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub effect_type: Option<Value>,
    /// Caller-facing key used to bind replacement content.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub effect_tag: Option<Value>,
    /// Free-form fields (sizes, fonts, colors, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EffectDef {
    /// `effectType` when it is a string.
    pub fn effect_type(&self) -> Option<&str> {
        self.effect_type.as_ref().and_then(Value::as_str)
    }

    /// `effectTag` when it is a string.
    pub fn effect_tag(&self) -> Option<&str> {
        self.effect_tag.as_ref().and_then(Value::as_str)
    }

    /// Parsed element kind.
    pub fn kind(&self) -> EffectKind {
        match self.effect_type() {
            Some("txt") => EffectKind::Text,
            Some("img") => EffectKind::Image,
            Some(other) => EffectKind::Other(other.to_string()),
            None => EffectKind::Other(String::new()),
        }
    }
}

/// An effect definition together with its table key.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectEntry {
    /// Key in the `effect` object.
    pub key: String,
    /// The definition.
    pub def: EffectDef,
}

/// Per-frame element data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    /// Frame this record applies to. Not guaranteed dense or sorted.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<Value>,
    /// Element placements for the frame, normally an array.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Any additional producer fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FrameRecord {
    /// Frame index when it is a whole, non-negative number (`3` and `3.0` alike).
    pub fn index(&self) -> Option<u64> {
        lenient_u64(self.frame_index.as_ref())
    }

    /// Element placements; empty when `data` is missing or not an array.
    pub fn items(&self) -> &[Value] {
        self.data
            .as_ref()
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Validated effect document extracted from a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Video descriptor.
    #[serde(rename = "descript")]
    pub descriptor: Descriptor,
    /// Effect table in document order.
    #[serde(
        rename = "effect",
        default,
        deserialize_with = "de_effect_table",
        serialize_with = "ser_effect_table"
    )]
    pub effects: Vec<EffectEntry>,
    /// Frame table in document order.
    #[serde(rename = "datas", default)]
    pub frames: Vec<FrameRecord>,
    /// Any additional top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn de_effect_table<'de, D>(de: D) -> Result<Vec<EffectEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let table = Option::<Map<String, Value>>::deserialize(de)?.unwrap_or_default();
    table
        .into_iter()
        .map(|(key, v)| {
            let def = EffectDef::deserialize(v).map_err(serde::de::Error::custom)?;
            Ok(EffectEntry { key, def })
        })
        .collect()
}

fn ser_effect_table<S>(effects: &[EffectEntry], ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use serde::ser::SerializeMap as _;
    let mut map = ser.serialize_map(Some(effects.len()))?;
    for e in effects {
        map.serialize_entry(&e.key, &e.def)?;
    }
    map.end()
}

impl MetadataDocument {
    /// Parse and validate a decoded JSON document.
    ///
    /// Rejects documents whose descriptor does not carry `isEffect == 1`.
    pub fn from_json_slice(bytes: &[u8]) -> DualframeResult<Self> {
        let doc: Self =
            serde_json::from_slice(bytes).map_err(|e| DualframeError::serde(e.to_string()))?;
        if !doc.descriptor.is_effect() {
            return Err(DualframeError::validation(format!(
                "descriptor isEffect must be 1, got {}",
                doc.descriptor.is_effect.as_ref().unwrap_or(&Value::Null)
            )));
        }
        Ok(doc)
    }

    /// Serialize back to the embedded JSON shape.
    ///
    /// Field values come back exactly as they were read. The only normalization is that a
    /// missing `effect` or `datas` table is written as an empty one.
    pub fn to_json(&self) -> DualframeResult<Value> {
        serde_json::to_value(self).map_err(|e| DualframeError::serde(e.to_string()))
    }

    /// First effect whose `effectTag` equals `tag` exactly.
    pub fn effect_by_tag(&self, tag: &str) -> Option<&EffectEntry> {
        self.effects
            .iter()
            .find(|e| e.def.effect_tag() == Some(tag))
    }

    /// Element data of the record with `frame_index`, if any.
    pub fn frame_data(&self, frame_index: u64) -> Option<&[Value]> {
        self.frames
            .iter()
            .find(|r| r.index() == Some(frame_index))
            .map(FrameRecord::items)
    }

    /// Frame count as `last record's frameIndex + 1`.
    ///
    /// Gaps are not checked: records `[0, 1, 4]` give 5. A last record without a usable index
    /// gives 0.
    pub fn total_frames(&self) -> u64 {
        self.frames
            .last()
            .and_then(FrameRecord::index)
            .map_or(0, |i| i.saturating_add(1))
    }

    /// Tags that appear on more than one effect, in first-seen order.
    pub fn duplicate_tags(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let mut dups = Vec::new();
        for tag in self.effects.iter().filter_map(|e| e.def.effect_tag()) {
            if !seen.insert(tag) && !dups.contains(&tag) {
                dups.push(tag);
            }
        }
        dups
    }

    /// Effects whose type is `"img"`.
    pub fn image_effects(&self) -> impl Iterator<Item = &EffectEntry> {
        self.effects
            .iter()
            .filter(|e| e.def.kind() == EffectKind::Image)
    }

    /// Effects whose type is `"txt"`.
    pub fn text_effects(&self) -> impl Iterator<Item = &EffectEntry> {
        self.effects
            .iter()
            .filter(|e| e.def.kind() == EffectKind::Text)
    }

    /// Find the effect a frame element refers to.
    ///
    /// Resolution order: matching `effectId`, then a table key equal to the element's
    /// `effectId`, then the first effect whose kind fits the element's aspect ratio
    /// (`w / h >= 1.5` is text, otherwise image), then the first effect.
    pub fn resolve_effect(&self, item: &Value) -> Option<&EffectEntry> {
        let id = item.get("effectId").filter(|v| !v.is_null());

        if let Some(id) = id {
            if let Some(e) = self
                .effects
                .iter()
                .find(|e| e.def.effect_id.as_ref().is_some_and(|own| loose_eq(own, id)))
            {
                return Some(e);
            }
            if let Some(key) = key_form(id)
                && let Some(e) = self.effects.iter().find(|e| e.key == key)
            {
                return Some(e);
            }
        }

        let rect = item
            .get("outputFrame")
            .or_else(|| item.get("renderFrame"))
            .and_then(Value::as_array)?;
        let w = rect.get(2).and_then(Value::as_f64)?;
        let h = rect.get(3).and_then(Value::as_f64)?;
        let wanted = if h != 0.0 && w / h >= 1.5 {
            EffectKind::Text
        } else {
            EffectKind::Image
        };
        self.effects
            .iter()
            .find(|e| e.def.kind() == wanted)
            .or_else(|| self.effects.first())
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

fn key_form(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/metadata/model.rs"]
mod tests;
