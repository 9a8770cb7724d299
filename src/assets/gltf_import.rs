use super::decoder::GeometryDecoder;
use super::AssetError;
use crate::animation::{AnimationClip, Interpolation, Track, TrackValues};
use crate::scene::{Geometry, Material, NodeId, NodeKind, SceneGraph, Skin, Transform};
use glam::{Mat4, Quat, Vec3};
use std::collections::HashSet;

const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";
const DEFAULT_COLOR: Vec3 = Vec3::splat(0.8);

#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub name: String,
    pub transform: Transform,
    pub children: Vec<usize>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    pub is_joint: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedPrimitive {
    pub geometry: Geometry,
    pub color: Vec3,
}

#[derive(Debug, Clone)]
pub struct ParsedSkin {
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}

/// A decoded asset that is not yet part of any scene graph.
///
/// Produced off the frame thread; `instantiate` turns it into scene nodes.
#[derive(Debug, Clone)]
pub struct ParsedAsset {
    pub label: String,
    pub nodes: Vec<ParsedNode>,
    pub roots: Vec<usize>,
    pub meshes: Vec<Vec<ParsedPrimitive>>,
    pub skins: Vec<ParsedSkin>,
    pub clips: Vec<AnimationClip>,
}

impl ParsedAsset {
    pub fn clip_names(&self) -> Vec<String> {
        self.clips.iter().map(|clip| clip.name.clone()).collect()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes
            .iter()
            .flatten()
            .map(|primitive| primitive.geometry.triangle_count())
            .sum()
    }
}

/// Scene handles of an instantiated asset.
#[derive(Debug, Clone)]
pub struct Instance {
    pub root: NodeId,
    /// Scene node for each asset node index; `None` for nodes outside the scene.
    pub bindings: Vec<Option<NodeId>>,
}

impl Instance {
    pub fn bindings_for(&self, clip: &AnimationClip) -> Vec<Option<NodeId>> {
        clip.tracks
            .iter()
            .map(|track| self.bindings.get(track.target).copied().flatten())
            .collect()
    }
}

/// Parses a self-contained asset: a `.glb`, or `.gltf` with embedded buffers.
pub fn parse_glb(
    bytes: &[u8],
    label: &str,
    decoder: Option<&dyn GeometryDecoder>,
) -> Result<ParsedAsset, AssetError> {
    let no_external = |uri: &str| -> Result<Vec<u8>, AssetError> {
        Err(AssetError::InvalidData(format!(
            "external buffer {} cannot be resolved for an in-memory asset",
            uri
        )))
    };
    parse_gltf(bytes, label, decoder, &no_external)
}

/// Parses `.glb` or `.gltf` bytes. Buffers referenced by relative URI are
/// fetched through `resolve`; embedded and `data:` buffers are read in place.
pub fn parse_gltf(
    bytes: &[u8],
    label: &str,
    decoder: Option<&dyn GeometryDecoder>,
    resolve: &dyn Fn(&str) -> Result<Vec<u8>, AssetError>,
) -> Result<ParsedAsset, AssetError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::from_slice_without_validation(bytes)?;
    let document = match decoder {
        Some(_) => document,
        None => {
            if document.extensions_required().any(|ext| ext == DRACO_EXTENSION) {
                return Err(AssetError::UnsupportedCompression(DRACO_EXTENSION.to_string()));
            }
            gltf::Document::from_json(document.into_json())?
        }
    };
    let buffers = load_buffers(&document, blob, resolve)?;
    let get = |buffer: gltf::Buffer<'_>| buffers.get(buffer.index()).map(|data| data.0.as_slice());

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| AssetError::EmptyScene(label.to_string()))?;
    let roots: Vec<usize> = scene.nodes().map(|node| node.index()).collect();
    if roots.is_empty() {
        return Err(AssetError::EmptyScene(label.to_string()));
    }

    let mut skins = Vec::new();
    let mut joint_set = HashSet::new();
    for skin in document.skins() {
        let joints: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
        joint_set.extend(joints.iter().copied());
        let inverse_bind = skin
            .reader(get)
            .read_inverse_bind_matrices()
            .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
            .unwrap_or_else(|| vec![Mat4::IDENTITY; joints.len()]);
        skins.push(ParsedSkin {
            joints,
            inverse_bind,
        });
    }

    let nodes = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            ParsedNode {
                name: node
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("node_{}", node.index())),
                transform: Transform {
                    translation: Vec3::from(translation),
                    rotation: Quat::from_array(rotation).normalize(),
                    scale: Vec3::from(scale),
                },
                children: node.children().map(|child| child.index()).collect(),
                mesh: node.mesh().map(|mesh| mesh.index()),
                skin: node.skin().map(|skin| skin.index()),
                is_joint: joint_set.contains(&node.index()),
            }
        })
        .collect();

    let mut meshes = Vec::new();
    for mesh in document.meshes() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::debug!(
                    "{}: skipping {:?} primitive in mesh {}",
                    label,
                    primitive.mode(),
                    mesh.index()
                );
                continue;
            }
            let [r, g, b, _] = primitive.material().pbr_metallic_roughness().base_color_factor();
            let color = if primitive.material().index().is_some() {
                Vec3::new(r, g, b)
            } else {
                DEFAULT_COLOR
            };
            let geometry = match primitive.extension_value(DRACO_EXTENSION) {
                Some(extension) => decode_compressed(&document, &buffers, extension, decoder)?,
                None => read_primitive(&primitive, get),
            };
            if geometry.positions.is_empty() {
                continue;
            }
            primitives.push(ParsedPrimitive { geometry, color });
        }
        meshes.push(primitives);
    }

    let clips = document
        .animations()
        .map(|animation| read_animation(&animation, get))
        .collect();

    Ok(ParsedAsset {
        label: label.to_string(),
        nodes,
        roots,
        meshes,
        skins,
        clips,
    })
}

fn load_buffers(
    document: &gltf::Document,
    mut blob: Option<Vec<u8>>,
    resolve: &dyn Fn(&str) -> Result<Vec<u8>, AssetError>,
) -> Result<Vec<gltf::buffer::Data>, AssetError> {
    let mut buffers = Vec::new();
    for buffer in document.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Uri(uri) if !uri.contains(':') => gltf::buffer::Data(resolve(uri)?),
            source => gltf::buffer::Data::from_source_and_blob(source, None, &mut blob)?,
        };
        if data.0.len() < buffer.length() {
            return Err(AssetError::InvalidData(format!(
                "buffer {} holds {} of {} bytes",
                buffer.index(),
                data.0.len(),
                buffer.length()
            )));
        }
        buffers.push(data);
    }
    Ok(buffers)
}

fn read_primitive<'a, 's, F>(primitive: &'a gltf::Primitive<'a>, get: F) -> Geometry
where
    F: Clone + Fn(gltf::Buffer<'a>) -> Option<&'s [u8]>,
{
    let reader = primitive.reader(get);
    let positions: Vec<Vec3> = reader
        .read_positions()
        .map(|iter| iter.map(Vec3::from).collect())
        .unwrap_or_default();
    let vertex_count = positions.len();
    let indices: Vec<u32> = reader
        .read_indices()
        .map(|iter| iter.into_u32().collect())
        .unwrap_or_else(|| (0..vertex_count as u32).collect());
    let joints: Vec<[u16; 4]> = reader
        .read_joints(0)
        .map(|iter| iter.into_u16().collect())
        .unwrap_or_default();
    let weights: Vec<[f32; 4]> = reader
        .read_weights(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_default();
    let indices = indices
        .chunks_exact(3)
        .filter(|tri| tri.iter().all(|i| (*i as usize) < vertex_count))
        .flatten()
        .copied()
        .collect();
    Geometry {
        positions,
        indices,
        joints,
        weights,
    }
}

fn decode_compressed(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    extension: &gltf::json::Value,
    decoder: Option<&dyn GeometryDecoder>,
) -> Result<Geometry, AssetError> {
    let Some(decoder) = decoder else {
        return Err(AssetError::UnsupportedCompression(DRACO_EXTENSION.to_string()));
    };
    let view_index = extension
        .get("bufferView")
        .and_then(|value| value.as_u64())
        .ok_or_else(|| AssetError::InvalidData("compressed primitive without bufferView".into()))?;
    let view = document
        .views()
        .nth(view_index as usize)
        .ok_or_else(|| AssetError::InvalidData(format!("bufferView {} out of range", view_index)))?;
    let bytes = buffers
        .get(view.buffer().index())
        .and_then(|data| data.0.get(view.offset()..view.offset() + view.length()))
        .ok_or_else(|| AssetError::InvalidData(format!("bufferView {} exceeds its buffer", view_index)))?;
    Ok(decoder.decode(bytes)?)
}

fn read_animation<'a, 's, F>(animation: &gltf::Animation<'a>, get: F) -> AnimationClip
where
    F: Clone + Fn(gltf::Buffer<'a>) -> Option<&'s [u8]>,
{
    use gltf::animation::util::ReadOutputs;

    let mut tracks = Vec::new();
    for channel in animation.channels() {
        let reader = channel.reader(get.clone());
        let Some(times) = reader.read_inputs().map(|iter| iter.collect::<Vec<f32>>()) else {
            continue;
        };
        let values = match reader.read_outputs() {
            Some(ReadOutputs::Translations(iter)) => {
                TrackValues::Translation(iter.map(Vec3::from).collect())
            }
            Some(ReadOutputs::Rotations(rotations)) => TrackValues::Rotation(
                rotations.into_f32().map(Quat::from_array).collect(),
            ),
            Some(ReadOutputs::Scales(iter)) => TrackValues::Scale(iter.map(Vec3::from).collect()),
            Some(ReadOutputs::MorphTargetWeights(_)) | None => continue,
        };
        let interpolation = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Step => Interpolation::Step,
            gltf::animation::Interpolation::Linear => Interpolation::Linear,
            gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
        };
        tracks.push(Track {
            target: channel.target().node().index(),
            times,
            values,
            interpolation,
        });
    }
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("animation_{}", animation.index()));
    AnimationClip::new(name, tracks)
}

/// Adds the asset under `parent` and returns the new subtree's handles.
pub fn instantiate(asset: &ParsedAsset, scene: &mut SceneGraph, parent: NodeId) -> Instance {
    let root = scene.add_group(parent, &asset.label);
    let mut bindings = vec![None; asset.nodes.len()];
    let mut stack: Vec<(usize, NodeId)> = asset.roots.iter().rev().map(|i| (*i, root)).collect();
    while let Some((index, parent_id)) = stack.pop() {
        let Some(parsed) = asset.nodes.get(index) else {
            continue;
        };
        if bindings[index].is_some() {
            log::warn!("{}: node {} referenced twice; ignoring", asset.label, index);
            continue;
        }
        let kind = if parsed.is_joint {
            NodeKind::Bone
        } else {
            NodeKind::Group
        };
        let id = scene.add_node(parent_id, &parsed.name, kind);
        if let Some(node) = scene.node_mut(id) {
            node.transform = parsed.transform;
        }
        bindings[index] = Some(id);
        stack.extend(parsed.children.iter().rev().map(|child| (*child, id)));
    }

    for (index, parsed) in asset.nodes.iter().enumerate() {
        let (Some(node_id), Some(mesh)) = (bindings[index], parsed.mesh) else {
            continue;
        };
        // A skin with a joint outside the scene cannot be posed; draw the mesh unskinned.
        let skin = parsed
            .skin
            .and_then(|skin| asset.skins.get(skin))
            .and_then(|skin| {
                let joints = skin
                    .joints
                    .iter()
                    .map(|joint| bindings.get(*joint).copied().flatten())
                    .collect::<Option<Vec<NodeId>>>()?;
                Some(Skin {
                    joints,
                    inverse_bind: skin.inverse_bind.clone(),
                })
            });
        for (i, primitive) in asset.meshes.get(mesh).into_iter().flatten().enumerate() {
            let geometry = scene.add_geometry(primitive.geometry.clone());
            let material = scene.add_material(Material {
                color: primitive.color,
            });
            scene.add_node(
                node_id,
                &format!("{}.primitive{}", parsed.name, i),
                NodeKind::Mesh {
                    geometry,
                    material,
                    skin: skin.clone(),
                },
            );
        }
    }

    Instance { root, bindings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{fixtures, DecodeError};
    use std::sync::Mutex;

    /// Records what it was handed and returns a tetrahedron.
    #[derive(Default)]
    struct RecordingDecoder {
        received: Mutex<Vec<Vec<u8>>>,
    }

    impl GeometryDecoder for RecordingDecoder {
        fn name(&self) -> &str {
            "recording"
        }

        fn decode(&self, compressed: &[u8]) -> Result<Geometry, DecodeError> {
            self.received.lock().unwrap().push(compressed.to_vec());
            Ok(Geometry {
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z],
                indices: vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3],
                ..Geometry::default()
            })
        }

        fn dispose(&self) {}
    }

    const PAYLOAD: [u8; 8] = [0xD7, 0xAC, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    #[test]
    fn static_box_parses_geometry_and_color() {
        let asset = parse_glb(&fixtures::static_box(), "box.glb", None).unwrap();
        assert_eq!(asset.roots, vec![0]);
        assert_eq!(asset.meshes.len(), 1);
        assert_eq!(asset.triangle_count(), 12);
        assert!(asset.clips.is_empty());
        assert!((asset.meshes[0][0].color - Vec3::new(1.0, 0.5, 0.25)).length() < 1e-6);
    }

    #[test]
    fn animated_box_carries_every_clip() {
        let asset = parse_glb(&fixtures::animated_box(1.0), "anim.glb", None).unwrap();
        assert_eq!(asset.clip_names(), vec!["spin".to_string(), "bob".to_string()]);
        assert!((asset.clips[0].duration - 1.0).abs() < 1e-6);
        assert_eq!(asset.clips[0].tracks[0].target, 0);
    }

    #[test]
    fn empty_scene_is_an_error() {
        let err = parse_glb(&fixtures::empty_scene(), "empty.glb", None).unwrap_err();
        assert!(matches!(err, AssetError::EmptyScene(_)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_glb(b"definitely not a glb", "junk.glb", None).unwrap_err();
        assert!(matches!(err, AssetError::Parse(_)));
    }

    #[test]
    fn bone_rig_instantiates_bones_and_bindings() {
        let asset = parse_glb(&fixtures::bone_rig(), "rig.glb", None).unwrap();
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let instance = instantiate(&asset, &mut scene, root);

        assert!(!scene.contains_mesh(instance.root));
        assert_eq!(scene.bones_in(instance.root).len(), 2);
        let bindings = instance.bindings_for(&asset.clips[0]);
        assert!(bindings.iter().all(Option::is_some));
    }

    #[test]
    fn instantiated_box_owns_its_resources() {
        let asset = parse_glb(&fixtures::static_box(), "box.glb", None).unwrap();
        let mut scene = SceneGraph::new();
        let root = scene.root();
        let before = scene.resource_counts();
        let instance = instantiate(&asset, &mut scene, root);
        assert!(scene.contains_mesh(instance.root));

        let report = scene.dispose_subtree(instance.root);
        assert_eq!(report.geometries, 1);
        assert_eq!(report.materials, 1);
        assert_eq!(scene.resource_counts(), before);
    }

    #[test]
    fn external_buffers_are_fetched_through_the_resolver() {
        let (document, bin) = fixtures::external_box("box.bin");
        let requested = Mutex::new(Vec::new());
        let resolve = |uri: &str| -> Result<Vec<u8>, AssetError> {
            requested.lock().unwrap().push(uri.to_string());
            Ok(bin.clone())
        };
        let asset = parse_gltf(&document, "box.gltf", None, &resolve).unwrap();
        assert_eq!(asset.triangle_count(), 12);
        assert_eq!(*requested.lock().unwrap(), vec!["box.bin".to_string()]);
    }

    #[test]
    fn external_buffers_need_a_resolver() {
        let (document, _) = fixtures::external_box("box.bin");
        let err = parse_glb(&document, "box.gltf", None).unwrap_err();
        assert!(matches!(err, AssetError::InvalidData(_)), "{:?}", err);
    }

    #[test]
    fn short_external_buffer_is_rejected() {
        let (document, bin) = fixtures::external_box("box.bin");
        let resolve = |_: &str| -> Result<Vec<u8>, AssetError> { Ok(bin[..8].to_vec()) };
        let err = parse_gltf(&document, "box.gltf", None, &resolve).unwrap_err();
        assert!(matches!(err, AssetError::InvalidData(_)), "{:?}", err);
    }

    #[test]
    fn compressed_primitive_goes_through_the_decoder() {
        let decoder = RecordingDecoder::default();
        let bytes = fixtures::compressed_box(&PAYLOAD, Some(0));
        let asset = parse_glb(&bytes, "packed.glb", Some(&decoder)).unwrap();

        assert_eq!(*decoder.received.lock().unwrap(), vec![PAYLOAD.to_vec()]);
        assert_eq!(asset.triangle_count(), 4);
        assert!((asset.meshes[0][0].color - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-6);
    }

    #[test]
    fn compressed_primitive_without_decoder_is_unsupported() {
        let bytes = fixtures::compressed_box(&PAYLOAD, Some(0));
        let err = parse_glb(&bytes, "packed.glb", None).unwrap_err();
        assert!(
            matches!(&err, AssetError::UnsupportedCompression(ext) if ext == DRACO_EXTENSION),
            "{:?}",
            err
        );
    }

    #[test]
    fn compressed_primitive_with_bad_buffer_view_is_invalid() {
        let decoder = RecordingDecoder::default();
        for view in [Some(5), None] {
            let bytes = fixtures::compressed_box(&PAYLOAD, view);
            let err = parse_glb(&bytes, "packed.glb", Some(&decoder)).unwrap_err();
            assert!(matches!(err, AssetError::InvalidData(_)), "{:?}: {:?}", view, err);
        }
        assert!(decoder.received.lock().unwrap().is_empty());
    }
}
