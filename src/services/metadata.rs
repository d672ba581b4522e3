//! Generation metadata extraction.
//!
//! Opens one media file and produces a normalized metadata mapping:
//! PNG text chunks (ComfyUI `workflow`/`prompt` JSON graphs, Automatic1111
//! `parameters` text) and JPEG EXIF tags. Extraction is best-effort
//! throughout — a field that fails to decode is skipped or kept verbatim,
//! never an error for the file as a whole.
//!
//! PNG chunks are parsed natively: 4-byte length (big-endian), 4-byte type,
//! `length` bytes of data, 4-byte CRC. tEXt chunks use keyword\0value format.
//! iTXt chunks use keyword\0flags\0language\0translated_keyword\0text.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;

use regex::Regex;
use serde_json::{Map, Value};

/// Placeholder stored when an EXIF value cannot be rendered.
const DECODE_ERROR_SENTINEL: &str = "Error decoding value";

// ─── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum MetadataError {
    /// The path does not reference an existing file.
    NotFound(String),
    Io(std::io::Error),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::NotFound(p) => write!(f, "File not found: {}", p),
            MetadataError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Io(e)
    }
}

// ─── File info helpers ───────────────────────────────────────────────────────

/// Render a byte count the way the gallery UI expects it.
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Source mtime as float seconds since the epoch (0.0 when unavailable).
pub fn mtime_seconds(path: &Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Human-readable rendering of an mtime timestamp.
pub fn format_timestamp(timestamp: f64) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

// ─── PNG chunk parsing ───────────────────────────────────────────────────────

/// PNG file signature (8 bytes).
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Upper bound on an accepted text-chunk payload. Declared chunk lengths
/// are untrusted input; larger chunks are skipped without allocating.
const MAX_TEXT_CHUNK_LEN: usize = 32 * 1024 * 1024;

/// Extract all tEXt and iTXt chunks from a PNG file.
///
/// Returns a map of keyword -> text value. Non-PNG files and files without
/// a valid signature return an empty map.
pub fn extract_png_text_chunks(path: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    if ext.as_deref() != Some("png") {
        return Ok(HashMap::new());
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut sig = [0u8; 8];
    if reader.read_exact(&mut sig).is_err() || sig != PNG_SIGNATURE {
        return Ok(HashMap::new());
    }

    let mut chunks = HashMap::new();

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let chunk_len = u32::from_be_bytes(len_buf) as usize;

        let mut type_buf = [0u8; 4];
        if reader.read_exact(&mut type_buf).is_err() {
            break;
        }
        let chunk_type = std::str::from_utf8(&type_buf).unwrap_or("");

        if chunk_type == "IEND" {
            break;
        }

        if (chunk_type == "tEXt" || chunk_type == "iTXt") && chunk_len <= MAX_TEXT_CHUNK_LEN {
            let mut data = vec![0u8; chunk_len];
            if reader.read_exact(&mut data).is_err() {
                break;
            }
            // Skip CRC
            let mut crc_buf = [0u8; 4];
            let _ = reader.read_exact(&mut crc_buf);

            if chunk_type == "tEXt" {
                parse_text_chunk(&data, &mut chunks);
            } else {
                parse_itxt_chunk(&data, &mut chunks);
            }
        } else {
            // Skip chunk data + CRC without reading it into memory.
            if reader.seek_relative(chunk_len as i64 + 4).is_err() {
                break;
            }
        }
    }

    Ok(chunks)
}

/// Parse a tEXt chunk: keyword\0value.
fn parse_text_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    if let Some(null_pos) = data.iter().position(|&b| b == 0) {
        let keyword = String::from_utf8_lossy(&data[..null_pos]).to_string();
        let value = String::from_utf8_lossy(&data[null_pos + 1..]).to_string();
        if !keyword.is_empty() {
            chunks.insert(keyword, value);
        }
    }
}

/// Parse an iTXt chunk. Compressed text (flag == 1) is skipped; generators
/// embed their metadata uncompressed.
fn parse_itxt_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    let keyword_end = match data.iter().position(|&b| b == 0) {
        Some(pos) => pos,
        None => return,
    };
    let keyword = String::from_utf8_lossy(&data[..keyword_end]).to_string();
    if keyword.is_empty() {
        return;
    }

    let mut offset = keyword_end + 1;

    // compression_flag + compression_method (1 byte each)
    if offset + 1 >= data.len() {
        return;
    }
    let compression_flag = data[offset];
    offset += 2;

    // language tag, then translated keyword (both null-terminated)
    for _ in 0..2 {
        match data[offset..].iter().position(|&b| b == 0) {
            Some(null_pos) => offset += null_pos + 1,
            None => return,
        }
    }

    if offset <= data.len() && compression_flag == 0 {
        let text = String::from_utf8_lossy(&data[offset..]).to_string();
        chunks.insert(keyword, text);
    }
}

// ─── A1111 "parameters" parsing ──────────────────────────────────────────────

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("invalid regex"))
}

macro_rules! param_re {
    ($pattern:expr) => {{
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, $pattern)
    }};
}

/// Parse an Automatic1111-style "parameters" text block into summary fields.
///
/// Format:
/// ```text
/// positive prompt text
/// Negative prompt: negative prompt text
/// Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 12345, Model: model_name
/// ```
///
/// Every field is optional; a failed match is simply omitted.
pub fn parse_parameters(text: &str, out: &mut Map<String, Value>) {
    let mut put = |key: &str, val: &str| {
        let val = val.trim();
        if !val.is_empty() {
            out.insert(key.to_string(), Value::String(val.to_string()));
        }
    };

    if let Some(c) = param_re!(r"Model: ([^,\n]+)").captures(text) {
        put("model", &c[1]);
    }
    if let Some(c) = param_re!(
        r"(?s)^(.*?)(?:Negative prompt:|Steps:|Model:|Sampler:|Seed:|Scheduler:|CFG)"
    )
    .captures(text)
    {
        put("positive_prompt", &c[1]);
    }
    if let Some(c) = param_re!(
        r"(?s)Negative prompt:(.*?)(?:Steps:|Model:|Sampler:|Seed:|Scheduler:|CFG|$)"
    )
    .captures(text)
    {
        put("negative_prompt", &c[1]);
    }
    if let Some(c) = param_re!(r"Sampler: ([^,\n]+)").captures(text) {
        put("sampler", &c[1]);
    }
    if let Some(c) = param_re!(r"Scheduler: ([^,\n]+)").captures(text) {
        put("scheduler", &c[1]);
    }
    if let Some(c) = param_re!(r"Steps: (\d+)").captures(text) {
        put("steps", &c[1]);
    }
    if let Some(c) = param_re!(r"(?i)CFG[ scale]*: ([\d.]+)").captures(text) {
        put("cfg_scale", &c[1]);
    }
    if let Some(c) = param_re!(r"Seed: (\d+)").captures(text) {
        put("seed", &c[1]);
    }
    if let Some(c) = param_re!(r"<lora:([^>]+)>").captures(text) {
        push_lora(out, c[1].trim());
    }
}

// ─── Prompt graph rules ──────────────────────────────────────────────────────

/// One node of a parsed prompt graph, plus the graph itself for
/// cross-node reference resolution.
pub struct NodeView<'a> {
    pub class_type: &'a str,
    /// Lowercased `_meta.title`, empty when absent.
    pub title: String,
    pub inputs: &'a Map<String, Value>,
    pub graph: &'a Map<String, Value>,
}

impl<'a> NodeView<'a> {
    fn input_str(&self, key: &str) -> Option<&'a str> {
        self.inputs.get(key).and_then(|v| v.as_str())
    }

    fn input_number(&self, key: &str) -> Option<f64> {
        self.inputs.get(key).and_then(|v| v.as_f64())
    }
}

type Predicate = fn(&NodeView) -> bool;
type Extractor = fn(&NodeView, &mut Map<String, Value>);

/// A single heuristic rule: when `applies` matches a node, `extract` may
/// contribute summary fields. Rules run in declaration order over every
/// node; unrecognized nodes match nothing and are skipped.
pub struct NodeRule {
    pub applies: Predicate,
    pub extract: Extractor,
}

/// Fixed-order rule registry. New generator node types are supported by
/// adding a rule here, not by touching the walk.
pub static NODE_RULES: &[NodeRule] = &[
    // Positive prompt: CLIP text encoders whose title is not "negative".
    NodeRule {
        applies: |n| n.class_type.contains("CLIPTextEncode") && !n.title.contains("negative"),
        extract: |n, out| {
            if let Some(text) = n.input_str("text") {
                if text.len() > 5 {
                    set_once(out, "positive_prompt", text);
                }
            }
        },
    },
    // Negative prompt: same encoders, title contains "negative".
    NodeRule {
        applies: |n| n.class_type.contains("CLIPTextEncode") && n.title.contains("negative"),
        extract: |n, out| {
            if let Some(text) = n.input_str("text") {
                set_once(out, "negative_prompt", text);
            }
        },
    },
    // Step count from scheduler nodes.
    NodeRule {
        applies: |n| n.class_type.contains("Scheduler"),
        extract: |n, out| {
            if let Some(steps) = n.input_number("steps") {
                set_once(out, "steps", &format_number(steps));
            }
        },
    },
    // Sampler name.
    NodeRule {
        applies: |n| {
            n.class_type.contains("KSampler") || n.class_type.to_lowercase().contains("sampler")
        },
        extract: |n, out| {
            if let Some(sampler) = n.input_str("sampler_name") {
                set_once(out, "sampler", sampler);
            }
            if let Some(scheduler) = n.input_str("scheduler") {
                set_once(out, "scheduler", scheduler);
            }
        },
    },
    // CFG / guidance value, wherever it appears.
    NodeRule {
        applies: |n| n.inputs.contains_key("cfg"),
        extract: |n, out| {
            if let Some(cfg) = n.input_number("cfg") {
                set_once(out, "cfg_scale", &format_number(cfg));
            }
        },
    },
    // Seed, resolving one level of [node_id, output_index] reference.
    NodeRule {
        applies: |n| n.inputs.contains_key("seed"),
        extract: |n, out| {
            if let Some(seed) = resolve_seed(n.inputs.get("seed"), n.graph) {
                set_once(out, "seed", &seed);
            }
        },
    },
    // Checkpoint / UNet model name.
    NodeRule {
        applies: |n| {
            n.class_type.contains("CheckpointLoader")
                || n.class_type.contains("UNETLoader")
                || n.class_type.contains("DiffusersLoader")
        },
        extract: |n, out| {
            for key in ["ckpt_name", "unet_name", "model_name"] {
                if let Some(model) = n.input_str(key) {
                    set_once(out, "model", model);
                    break;
                }
            }
        },
    },
    // LoRA loaders: flat `lora_name`/`lora` fields and per-slot
    // `lora_1`, `lora_2`, ... objects with an `on` flag.
    NodeRule {
        applies: |n| n.class_type.to_lowercase().contains("lora") || n.title.contains("lora"),
        extract: |n, out| {
            for key in ["lora_name", "lora"] {
                if let Some(lora) = n.input_str(key) {
                    push_lora(out, lora);
                    break;
                }
            }
            for (key, value) in n.inputs {
                if key.starts_with("lora_") {
                    if let Some(slot) = value.as_object() {
                        let enabled = slot.get("on").and_then(|v| v.as_bool()).unwrap_or(false);
                        if enabled {
                            if let Some(lora) = slot.get("lora").and_then(|v| v.as_str()) {
                                push_lora(out, lora);
                            }
                        }
                    }
                }
            }
        },
    },
];

fn set_once(out: &mut Map<String, Value>, key: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !out.contains_key(key) {
        out.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Append a LoRA name to the `loras` array, skipping duplicates.
fn push_lora(out: &mut Map<String, Value>, name: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }
    let entry = out
        .entry("loras".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(list) = entry.as_array_mut() {
        if !list.iter().any(|v| v.as_str() == Some(name)) {
            list.push(Value::String(name.to_string()));
        }
    }
}

/// Render a numeric input without a trailing `.0` for whole values.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 9e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Seed inputs are either a literal number or a `[node_id, output_index]`
/// reference into the graph; one level of indirection is followed.
fn resolve_seed(value: Option<&Value>, graph: &Map<String, Value>) -> Option<String> {
    match value? {
        Value::Number(n) => n.as_f64().map(format_number),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(parts) => {
            let node_id = parts.first()?.as_str()?;
            let inputs = graph.get(node_id)?.get("inputs")?.as_object()?;
            for key in ["seed", "noise_seed"] {
                if let Some(n) = inputs.get(key).and_then(|v| v.as_f64()) {
                    return Some(format_number(n));
                }
            }
            None
        }
        _ => None,
    }
}

/// Walk every node of a parsed prompt graph and apply the rule registry.
/// Node order never matters: each summary field is written once and the
/// walk visits all nodes regardless.
pub fn apply_prompt_rules(graph: &Map<String, Value>, out: &mut Map<String, Value>) {
    for node in graph.values() {
        let inputs = match node.get("inputs").and_then(|i| i.as_object()) {
            Some(i) => i,
            None => continue,
        };
        let class_type = node.get("class_type").and_then(|v| v.as_str()).unwrap_or("");
        let title = node
            .get("_meta")
            .and_then(|m| m.get("title"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_lowercase();

        let view = NodeView {
            class_type,
            title,
            inputs,
            graph,
        };

        for rule in NODE_RULES {
            if (rule.applies)(&view) {
                (rule.extract)(&view, out);
            }
        }
    }
}

// ─── EXIF extraction ─────────────────────────────────────────────────────────

/// Decode JPEG EXIF data into string maps: primary-IFD tags at the top
/// level, Exif/GPS/Interop IFDs as nested maps. A field that fails to
/// render is replaced with a sentinel rather than aborting.
fn extract_exif(path: &Path, out: &mut Map<String, Value>) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return,
    };
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("[Metadata] No EXIF in {}: {}", path.display(), e);
            return;
        }
    };

    for field in exif.fields() {
        let tag_name = field.tag.to_string();
        let rendered = field.display_value().to_string();
        let value = if rendered.is_empty() {
            DECODE_ERROR_SENTINEL.to_string()
        } else {
            rendered
        };

        let ifd_name = match field.tag.context() {
            exif::Context::Exif => Some("Exif"),
            exif::Context::Gps => Some("GPSInfo"),
            exif::Context::Interop => Some("Interop"),
            _ => None,
        };

        match ifd_name {
            Some(ifd) => {
                let nested = out
                    .entry(ifd.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(map) = nested.as_object_mut() {
                    map.insert(tag_name, Value::String(value));
                }
            }
            None => {
                out.insert(tag_name, Value::String(value));
            }
        }
    }
}

// ─── Main extraction entry point ─────────────────────────────────────────────

/// Extract embedded metadata from one media file.
///
/// Returns the parsed prompt graph (Null when absent) and the full metadata
/// mapping. The only hard failure is a missing file; everything else
/// degrades to whatever could be decoded.
pub fn build_metadata(path: &Path) -> Result<(Value, Map<String, Value>), MetadataError> {
    if !path.is_file() {
        return Err(MetadataError::NotFound(path.display().to_string()));
    }

    let mut metadata = Map::new();
    let mut prompt_graph = Value::Null;

    // fileinfo is always present, even for files with no embedded chunks.
    let mut fileinfo = Map::new();
    fileinfo.insert(
        "filename".to_string(),
        Value::String(path.to_string_lossy().replace('\\', "/")),
    );
    if let Ok((w, h)) = image::image_dimensions(path) {
        fileinfo.insert("resolution".to_string(), Value::String(format!("{}x{}", w, h)));
    }
    let mtime = mtime_seconds(path);
    fileinfo.insert("date".to_string(), Value::String(format_timestamp(mtime)));
    if let Ok(meta) = std::fs::metadata(path) {
        fileinfo.insert("size".to_string(), Value::String(human_size(meta.len())));
    }
    metadata.insert("fileinfo".to_string(), Value::Object(fileinfo));

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => {
            let chunks = extract_png_text_chunks(path)?;
            for (key, value) in chunks {
                match key.as_str() {
                    "workflow" => match serde_json::from_str::<Value>(&value) {
                        Ok(parsed) => {
                            metadata.insert(key, parsed);
                        }
                        Err(e) => {
                            log::debug!("[Metadata] workflow chunk is not JSON: {}", e);
                            metadata.insert(key, Value::String(value));
                        }
                    },
                    "prompt" => match serde_json::from_str::<Value>(&value) {
                        Ok(parsed) => {
                            if let Some(graph) = parsed.as_object() {
                                apply_prompt_rules(graph, &mut metadata);
                            }
                            prompt_graph = parsed.clone();
                            metadata.insert(key, parsed);
                        }
                        Err(e) => {
                            log::debug!("[Metadata] prompt chunk is not JSON: {}", e);
                            metadata.insert(key, Value::String(value));
                        }
                    },
                    "parameters" => {
                        parse_parameters(&value, &mut metadata);
                        metadata.insert(key, Value::String(value));
                    }
                    // Timestamps look almost like JSON numbers; keep verbatim.
                    "CreationTime" => {
                        metadata.insert(key, Value::String(value));
                    }
                    _ => match serde_json::from_str::<Value>(&value) {
                        Ok(parsed) => {
                            metadata.insert(key, parsed);
                        }
                        Err(_) => {
                            metadata.insert(key, Value::String(value));
                        }
                    },
                }
            }
        }
        "jpg" | "jpeg" => extract_exif(path, &mut metadata),
        _ => {}
    }

    Ok((prompt_graph, metadata))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_parameters_basic() {
        let text = "beautiful landscape, mountains\nNegative prompt: ugly, blurry\nSteps: 20, Sampler: Euler a, CFG scale: 7.5, Seed: 12345, Model: sd_xl_base";
        let mut out = Map::new();
        parse_parameters(text, &mut out);
        assert_eq!(
            out["positive_prompt"].as_str(),
            Some("beautiful landscape, mountains")
        );
        assert_eq!(out["negative_prompt"].as_str(), Some("ugly, blurry"));
        assert_eq!(out["steps"].as_str(), Some("20"));
        assert_eq!(out["sampler"].as_str(), Some("Euler a"));
        assert_eq!(out["cfg_scale"].as_str(), Some("7.5"));
        assert_eq!(out["seed"].as_str(), Some("12345"));
        assert_eq!(out["model"].as_str(), Some("sd_xl_base"));
    }

    #[test]
    fn parse_parameters_partial_matches_are_omitted() {
        let mut out = Map::new();
        parse_parameters("just a prompt with no params", &mut out);
        assert!(!out.contains_key("steps"));
        assert!(!out.contains_key("seed"));
        assert!(!out.contains_key("negative_prompt"));
    }

    #[test]
    fn parse_parameters_lora_token() {
        let mut out = Map::new();
        parse_parameters("a castle <lora:gothic_style> Steps: 10", &mut out);
        let loras = out["loras"].as_array().unwrap();
        assert_eq!(loras[0].as_str(), Some("gothic_style"));
    }

    fn graph(json: &str) -> Map<String, Value> {
        serde_json::from_str::<Value>(json)
            .unwrap()
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn prompt_rules_extract_summary() {
        let g = graph(
            r#"{
            "3": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "Positive Prompt"},
                "inputs": {"text": "a beautiful sunset over the sea"}
            },
            "4": {
                "class_type": "CLIPTextEncode",
                "_meta": {"title": "Negative Prompt"},
                "inputs": {"text": "ugly, bad quality"}
            },
            "6": {
                "class_type": "KSampler",
                "inputs": {"seed": 42, "steps": 25, "cfg": 8.0,
                           "sampler_name": "euler", "scheduler": "karras"}
            },
            "7": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": {"ckpt_name": "sd_xl_base.safetensors"}
            }
        }"#,
        );
        let mut out = Map::new();
        apply_prompt_rules(&g, &mut out);
        assert_eq!(
            out["positive_prompt"].as_str(),
            Some("a beautiful sunset over the sea")
        );
        assert_eq!(out["negative_prompt"].as_str(), Some("ugly, bad quality"));
        assert_eq!(out["seed"].as_str(), Some("42"));
        assert_eq!(out["cfg_scale"].as_str(), Some("8"));
        assert_eq!(out["sampler"].as_str(), Some("euler"));
        assert_eq!(out["scheduler"].as_str(), Some("karras"));
        assert_eq!(out["model"].as_str(), Some("sd_xl_base.safetensors"));
    }

    #[test]
    fn prompt_rules_resolve_seed_reference() {
        let g = graph(
            r#"{
            "1": {
                "class_type": "KSamplerAdvanced",
                "inputs": {"seed": ["2", 0]}
            },
            "2": {
                "class_type": "Seed Everywhere",
                "inputs": {"seed": 777}
            }
        }"#,
        );
        let mut out = Map::new();
        apply_prompt_rules(&g, &mut out);
        assert_eq!(out["seed"].as_str(), Some("777"));
    }

    #[test]
    fn prompt_rules_collect_loras() {
        let g = graph(
            r#"{
            "10": {
                "class_type": "LoraLoader",
                "inputs": {"lora_name": "detail_tweaker.safetensors"}
            },
            "11": {
                "class_type": "Power Lora Loader (rgthree)",
                "inputs": {
                    "lora_1": {"on": true, "lora": "style_a.safetensors", "strength": 1.0},
                    "lora_2": {"on": false, "lora": "style_b.safetensors", "strength": 1.0},
                    "lora_3": {"on": true, "lora": "style_c.safetensors", "strength": 0.5}
                }
            }
        }"#,
        );
        let mut out = Map::new();
        apply_prompt_rules(&g, &mut out);
        let loras: Vec<&str> = out["loras"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(loras.contains(&"detail_tweaker.safetensors"));
        assert!(loras.contains(&"style_a.safetensors"));
        assert!(loras.contains(&"style_c.safetensors"));
        assert!(!loras.contains(&"style_b.safetensors"));
    }

    #[test]
    fn prompt_rules_skip_unknown_nodes() {
        let g = graph(r#"{"1": {"class_type": "SomeCustomThing", "inputs": {"x": 1}}}"#);
        let mut out = Map::new();
        apply_prompt_rules(&g, &mut out);
        assert!(out.is_empty());
    }

    /// Write a minimal PNG with one tEXt chunk to a temp file.
    fn write_png_with_text(dir: &Path, name: &str, keyword: &str, value: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut bytes: Vec<u8> = PNG_SIGNATURE.to_vec();

        let mut chunk_data = keyword.as_bytes().to_vec();
        chunk_data.push(0);
        chunk_data.extend_from_slice(value.as_bytes());

        bytes.extend_from_slice(&(chunk_data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(b"tEXt");
        bytes.extend_from_slice(&chunk_data);
        bytes.extend_from_slice(&[0, 0, 0, 0]); // CRC is not validated

        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(b"IEND");
        bytes.extend_from_slice(&[0, 0, 0, 0]);

        let mut f = File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn malformed_prompt_chunk_is_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png_with_text(dir.path(), "bad.png", "prompt", "{not valid json");
        let (graph, metadata) = build_metadata(&path).unwrap();
        assert!(graph.is_null());
        assert_eq!(metadata["prompt"].as_str(), Some("{not valid json"));
    }

    #[test]
    fn prompt_chunk_json_is_parsed_and_summarized() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = r#"{"6": {"class_type": "KSampler", "inputs": {"seed": 5, "cfg": 7.0, "sampler_name": "dpmpp_2m"}}}"#;
        let path = write_png_with_text(dir.path(), "good.png", "prompt", prompt);
        let (graph, metadata) = build_metadata(&path).unwrap();
        assert!(graph.is_object());
        assert_eq!(metadata["seed"].as_str(), Some("5"));
        assert_eq!(metadata["sampler"].as_str(), Some("dpmpp_2m"));
        assert!(metadata["fileinfo"].is_object());
    }

    #[test]
    fn oversized_chunk_lengths_are_skipped_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.png");

        let mut bytes = PNG_SIGNATURE.to_vec();
        let mut chunk_data = b"prompt".to_vec();
        chunk_data.push(0);
        chunk_data.extend_from_slice(b"{}");
        bytes.extend_from_slice(&(chunk_data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(b"tEXt");
        bytes.extend_from_slice(&chunk_data);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        // A truncated chunk declaring ~2 GiB of data that is not there.
        bytes.extend_from_slice(&0x7FFF_FFFFu32.to_be_bytes());
        bytes.extend_from_slice(b"tEXt");
        std::fs::write(&path, &bytes).unwrap();

        let chunks = extract_png_text_chunks(&path).unwrap();
        assert_eq!(chunks.get("prompt").map(String::as_str), Some("{}"));
        assert_eq!(chunks.len(), 1);
    }

    /// Minimal JPEG: SOI, one APP1 Exif segment carrying a single
    /// little-endian TIFF IFD with a Make tag, then EOI.
    fn write_jpeg_with_make(dir: &Path, name: &str) -> std::path::PathBuf {
        let tiff: Vec<u8> = [
            b"II".as_slice(),
            &[0x2A, 0x00, 0x08, 0x00, 0x00, 0x00],
            // one IFD entry
            &[0x01, 0x00],
            // Make (0x010F), ASCII, count 5, value at offset 26
            &[0x0F, 0x01, 0x02, 0x00, 0x05, 0x00, 0x00, 0x00, 0x1A, 0x00, 0x00, 0x00],
            // no next IFD
            &[0x00, 0x00, 0x00, 0x00],
            b"test\0",
        ]
        .concat();

        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE1];
        bytes.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        bytes.extend_from_slice(b"Exif\0\0");
        bytes.extend_from_slice(&tiff);
        bytes.extend_from_slice(&[0xFF, 0xD9]);

        let path = dir.join(name);
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    #[test]
    fn jpeg_exif_fields_are_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jpeg_with_make(dir.path(), "photo.jpg");
        let mut out = Map::new();
        extract_exif(&path, &mut out);
        let make = out.get("Make").and_then(|v| v.as_str()).expect("Make tag");
        assert!(make.contains("test"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = build_metadata(Path::new("/no/such/file.png")).unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[test]
    fn human_size_renders_units() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(2048), "2.00 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
    }
}
