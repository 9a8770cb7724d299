//! Binary glTF containers assembled in memory for tests.

use super::source::{AssetSource, FetchError, MemorySource};
use serde_json::{json, Value};
use std::sync::{Condvar, Mutex};

const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

#[derive(Default)]
struct Builder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl Builder {
    fn view(&mut self, bytes: &[u8]) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
        }));
        self.views.len() - 1
    }

    fn floats(&mut self, values: &[f32], ty: &str, components: usize) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.view(&bytes);
        let count = values.len() / components;
        let mut min = vec![f32::MAX; components];
        let mut max = vec![f32::MIN; components];
        for chunk in values.chunks_exact(components) {
            for (i, v) in chunk.iter().enumerate() {
                min[i] = min[i].min(*v);
                max[i] = max[i].max(*v);
            }
        }
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": 5126,
            "count": count,
            "type": ty,
            "min": min,
            "max": max,
        }));
        self.accessors.len() - 1
    }

    fn indices(&mut self, values: &[u16]) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.view(&bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": 5123,
            "count": values.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }

    fn finish(self, mut document: Value) -> Vec<u8> {
        document["asset"] = json!({ "version": "2.0" });
        if !self.bin.is_empty() {
            document["buffers"] = json!([{ "byteLength": self.bin.len() }]);
            document["bufferViews"] = Value::Array(self.views);
            document["accessors"] = Value::Array(self.accessors);
        }
        glb(&document, &self.bin)
    }

    /// Plain `.gltf` JSON whose single buffer lives in a separate file at `uri`.
    fn finish_external(self, mut document: Value, uri: &str) -> (Vec<u8>, Vec<u8>) {
        document["asset"] = json!({ "version": "2.0" });
        document["buffers"] = json!([{ "byteLength": self.bin.len(), "uri": uri }]);
        document["bufferViews"] = Value::Array(self.views);
        document["accessors"] = Value::Array(self.accessors);
        (serde_json::to_vec(&document).unwrap(), self.bin)
    }
}

fn chunk(out: &mut Vec<u8>, kind: u32, data: &[u8], pad: u8) {
    let padded = (data.len() + 3) & !3;
    out.extend_from_slice(&(padded as u32).to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + padded - data.len(), pad);
}

fn glb(document: &Value, bin: &[u8]) -> Vec<u8> {
    let json = serde_json::to_vec(document).unwrap();
    let mut body = Vec::new();
    chunk(&mut body, CHUNK_JSON, &json, b' ');
    if !bin.is_empty() {
        chunk(&mut body, CHUNK_BIN, bin, 0);
    }
    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&((body.len() + 12) as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Axis-aligned box spanning (0, 1, 0)..(2, 3, 4).
const BOX_MIN: [f32; 3] = [0.0, 1.0, 0.0];
const BOX_MAX: [f32; 3] = [2.0, 3.0, 4.0];

fn box_mesh(builder: &mut Builder) -> Value {
    let [x0, y0, z0] = BOX_MIN;
    let [x1, y1, z1] = BOX_MAX;
    let positions = [
        x0, y0, z0, x1, y0, z0, x1, y1, z0, x0, y1, z0, //
        x0, y0, z1, x1, y0, z1, x1, y1, z1, x0, y1, z1,
    ];
    let indices: [u16; 36] = [
        0, 2, 1, 0, 3, 2, // back
        4, 5, 6, 4, 6, 7, // front
        0, 1, 5, 0, 5, 4, // bottom
        3, 7, 6, 3, 6, 2, // top
        0, 4, 7, 0, 7, 3, // left
        1, 2, 6, 1, 6, 5, // right
    ];
    let position = builder.floats(&positions, "VEC3", 3);
    let index = builder.indices(&indices);
    json!({
        "primitives": [{ "attributes": { "POSITION": position }, "indices": index, "material": 0 }]
    })
}

fn box_document(builder: &mut Builder) -> Value {
    let mesh = box_mesh(builder);
    json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "Box", "mesh": 0 }],
        "meshes": [mesh],
        "materials": [{ "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.5, 0.25, 1.0] } }],
    })
}

pub fn static_box() -> Vec<u8> {
    let mut builder = Builder::default();
    let document = box_document(&mut builder);
    builder.finish(document)
}

/// The box with two clips: "spin" (rotation, `duration` seconds) and "bob" (translation).
pub fn animated_box(duration: f32) -> Vec<u8> {
    let mut builder = Builder::default();
    let mut document = box_document(&mut builder);
    let half = std::f32::consts::FRAC_1_SQRT_2;
    let spin_times = builder.floats(&[0.0, duration], "SCALAR", 1);
    let spin_values = builder.floats(&[0.0, 0.0, 0.0, 1.0, 0.0, half, 0.0, half], "VEC4", 4);
    let bob_times = builder.floats(&[0.0, 0.5, 1.0], "SCALAR", 1);
    let bob_values = builder.floats(&[0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0], "VEC3", 3);
    document["animations"] = json!([
        {
            "name": "spin",
            "samplers": [{ "input": spin_times, "output": spin_values, "interpolation": "LINEAR" }],
            "channels": [{ "sampler": 0, "target": { "node": 0, "path": "rotation" } }],
        },
        {
            "name": "bob",
            "samplers": [{ "input": bob_times, "output": bob_values, "interpolation": "STEP" }],
            "channels": [{ "sampler": 0, "target": { "node": 0, "path": "translation" } }],
        },
    ]);
    builder.finish(document)
}

/// Two bones under an armature node, no mesh, one "wave" clip on the upper bone.
pub fn bone_rig() -> Vec<u8> {
    let mut builder = Builder::default();
    let times = builder.floats(&[0.0, 1.0], "SCALAR", 1);
    let half = std::f32::consts::FRAC_1_SQRT_2;
    let values = builder.floats(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, half, half], "VEC4", 4);
    let document = json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "name": "Armature", "children": [1] },
            { "name": "Hips", "translation": [0.0, 1.0, 0.0], "children": [2] },
            { "name": "Spine", "translation": [0.0, 1.0, 0.0] },
        ],
        "skins": [{ "joints": [1, 2] }],
        "animations": [{
            "name": "wave",
            "samplers": [{ "input": times, "output": values }],
            "channels": [{ "sampler": 0, "target": { "node": 2, "path": "rotation" } }],
        }],
    });
    builder.finish(document)
}

pub fn empty_scene() -> Vec<u8> {
    Builder::default().finish(json!({
        "scene": 0,
        "scenes": [{ "nodes": [] }],
    }))
}

/// The static box as a `.gltf` document plus its external `.bin` buffer.
pub fn external_box(uri: &str) -> (Vec<u8>, Vec<u8>) {
    let mut builder = Builder::default();
    let document = box_document(&mut builder);
    builder.finish_external(document, uri)
}

/// A box whose only primitive is Draco-compressed, with `payload` stored in
/// bufferView 0. `view` is what the extension points at; `None` leaves it out.
pub fn compressed_box(payload: &[u8], view: Option<usize>) -> Vec<u8> {
    let mut builder = Builder::default();
    builder.view(payload);
    builder.accessors.push(json!({
        "componentType": 5126,
        "count": 4,
        "type": "VEC3",
    }));
    let mut extension = json!({ "attributes": { "POSITION": 0 } });
    if let Some(view) = view {
        extension["bufferView"] = json!(view);
    }
    builder.finish(json!({
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "name": "Packed", "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "material": 0,
                "extensions": { "KHR_draco_mesh_compression": extension },
            }]
        }],
        "materials": [{ "pbrMetallicRoughness": { "baseColorFactor": [0.2, 0.4, 0.6, 1.0] } }],
        "extensionsUsed": ["KHR_draco_mesh_compression"],
        "extensionsRequired": ["KHR_draco_mesh_compression"],
    }))
}

#[derive(Default)]
struct Gate {
    entered: bool,
    open: bool,
}

/// Holds fetches of one path until `open` is called.
pub struct GatedSource {
    inner: MemorySource,
    gated: String,
    gate: Mutex<Gate>,
    signal: Condvar,
}

impl GatedSource {
    pub fn new(inner: MemorySource, gated: &str) -> Self {
        Self {
            inner,
            gated: gated.to_string(),
            gate: Mutex::new(Gate::default()),
            signal: Condvar::new(),
        }
    }

    /// Blocks until a fetch of the gated path is waiting at the gate.
    pub fn wait_entered(&self) {
        let mut gate = self.gate.lock().unwrap();
        while !gate.entered {
            gate = self.signal.wait(gate).unwrap();
        }
    }

    pub fn open(&self) {
        self.gate.lock().unwrap().open = true;
        self.signal.notify_all();
    }
}

impl AssetSource for GatedSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        if path == self.gated {
            let mut gate = self.gate.lock().unwrap();
            gate.entered = true;
            self.signal.notify_all();
            while !gate.open {
                gate = self.signal.wait(gate).unwrap();
            }
        }
        self.inner.fetch(path)
    }
}
