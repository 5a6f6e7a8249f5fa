//! Packed ternary weight file reader/writer.
//!
//! Layout (little endian):
//!
//! ```text
//! magic "BN58" | version u32 (= 1)
//! vocab, hidden, heads, kv_heads, layers, intermediate, max_positions, eos  (u32 each)
//! norm_eps f32 | rope_theta f32 | flags u32 (bit 0 = rope)
//! per block:
//!   attention norm gamma  [hidden] f32
//!   q [hidden, hidden] | k [kv_dim, hidden] | v [kv_dim, hidden] | o [hidden, hidden]   packed
//!   ffn norm gamma        [hidden] f32
//!   up [intermediate, hidden] | down [hidden, intermediate]                             packed
//! embedding [vocab, hidden] packed
//! final norm gamma [hidden] f32
//! ```
//!
//! Packed tensors hold 4 ternary values per byte (see [`crate::kernels::ternary`]).
//! Any failure aborts the whole load; no partially built model is returned.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info};

use super::bitnet::{BitNetModel, TransformerBlock};
use super::config::BitNetConfig;
use super::ffn::FfnWeights;
use crate::attention::AttentionWeights;
use crate::errors::{BitNetError, Result};
use crate::kernels::{pack_ternary, packed_len, unpack_ternary_tensor};
use crate::tensor::Tensor;

/// File magic: "BN58".
pub const WEIGHTS_MAGIC: [u8; 4] = *b"BN58";
/// Only supported format version.
pub const WEIGHTS_VERSION: u32 = 1;

const FLAG_ROPE: u32 = 1;

fn io_err(e: std::io::Error, what: &str) -> BitNetError {
    if e.kind() == ErrorKind::UnexpectedEof {
        BitNetError::InvalidWeightsFormat(format!("truncated while reading {what}"))
    } else {
        BitNetError::WeightsFileRead(e)
    }
}

fn read_u32<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    r.read_u32::<LittleEndian>().map_err(|e| io_err(e, what))
}

fn read_f32<R: Read>(r: &mut R, what: &str) -> Result<f32> {
    r.read_f32::<LittleEndian>().map_err(|e| io_err(e, what))
}

fn read_gamma<R: Read>(r: &mut R, len: usize, what: &str) -> Result<Vec<f32>> {
    let mut gamma = vec![0.0f32; len];
    r.read_f32_into::<LittleEndian>(&mut gamma)
        .map_err(|e| io_err(e, what))?;
    Ok(gamma)
}

fn read_packed<R: Read>(r: &mut R, shape: &[usize], what: &str) -> Result<Tensor> {
    let count: usize = shape.iter().product();
    let needed = packed_len(count);
    // Read through `take` so a corrupt header cannot force a huge up-front allocation.
    let mut bytes = Vec::new();
    r.by_ref()
        .take(needed as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| io_err(e, what))?;
    if bytes.len() < needed {
        return Err(BitNetError::InvalidWeightsFormat(format!(
            "truncated while reading {what}: {} of {needed} bytes",
            bytes.len()
        )));
    }
    unpack_ternary_tensor(&bytes, shape)
}

fn read_config<R: Read>(r: &mut R) -> Result<BitNetConfig> {
    let mut fields = [0usize; 8];
    for (i, f) in fields.iter_mut().enumerate() {
        *f = read_u32(r, &format!("config field {i}"))? as usize;
    }
    let [
        vocab_size,
        hidden_size,
        num_attention_heads,
        num_key_value_heads,
        num_hidden_layers,
        intermediate_size,
        max_position_embeddings,
        eos_token_id,
    ] = fields;
    let norm_eps = read_f32(r, "norm_eps")?;
    let rope_theta = read_f32(r, "rope_theta")?;
    let flags = read_u32(r, "flags")?;
    let config = BitNetConfig {
        vocab_size,
        hidden_size,
        num_attention_heads,
        num_key_value_heads,
        num_hidden_layers,
        intermediate_size,
        max_position_embeddings,
        eos_token_id,
        norm_eps,
        rope_theta,
        use_rope: flags & FLAG_ROPE != 0,
    };
    config
        .validate()
        .map_err(|e| BitNetError::InvalidWeightsFormat(format!("bad header: {e}")))?;
    Ok(config)
}

/// Parse a model from any byte stream.
pub fn read_weights<R: Read>(mut r: R) -> Result<BitNetModel> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(|e| io_err(e, "magic"))?;
    if magic != WEIGHTS_MAGIC {
        return Err(BitNetError::InvalidWeightsFormat(format!(
            "bad magic {magic:02x?}"
        )));
    }
    let version = read_u32(&mut r, "version")?;
    if version != WEIGHTS_VERSION {
        return Err(BitNetError::UnsupportedVersion(version));
    }
    let config = read_config(&mut r)?;
    let (h, kv, i) = (config.hidden_size, config.kv_dim(), config.intermediate_size);

    let rope = config.rotary_embedding()?;

    // Layer count is untrusted until every block has actually been read.
    let mut blocks = Vec::new();
    for layer in 0..config.num_hidden_layers {
        let attention_norm = read_gamma(&mut r, h, "attention norm")?;
        let attention = AttentionWeights {
            q: read_packed(&mut r, &[h, h], "q projection")?,
            k: read_packed(&mut r, &[kv, h], "k projection")?,
            v: read_packed(&mut r, &[kv, h], "v projection")?,
            o: read_packed(&mut r, &[h, h], "o projection")?,
        };
        let ffn_norm = read_gamma(&mut r, h, "ffn norm")?;
        let ffn = FfnWeights {
            up: read_packed(&mut r, &[i, h], "up projection")?,
            down: read_packed(&mut r, &[h, i], "down projection")?,
        };
        blocks.push(TransformerBlock::new(
            &config,
            attention,
            attention_norm,
            ffn,
            ffn_norm,
            rope.clone(),
        )?);
        debug!(layer, "loaded block");
    }
    let embedding = read_packed(&mut r, &[config.vocab_size, h], "embedding")?;
    let norm = read_gamma(&mut r, h, "final norm")?;

    let mut trailing = [0u8; 1];
    match r.read(&mut trailing) {
        Ok(0) => {}
        Ok(_) => {
            return Err(BitNetError::InvalidWeightsFormat(
                "trailing bytes after final norm".to_string(),
            ))
        }
        Err(e) => return Err(BitNetError::WeightsFileRead(e)),
    }

    BitNetModel::new(config, blocks, embedding, norm)
}

/// Load a model from a weight file.
pub fn load_weights(path: impl AsRef<Path>) -> Result<BitNetModel> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let model = read_weights(BufReader::new(file))?;
    info!(
        path = %path.display(),
        layers = model.num_layers(),
        hidden = model.hidden_size(),
        vocab = model.vocab_size(),
        "loaded weights"
    );
    Ok(model)
}

fn write_gamma<W: Write>(w: &mut W, gamma: &[f32]) -> Result<()> {
    for &g in gamma {
        w.write_f32::<LittleEndian>(g)?;
    }
    Ok(())
}

fn write_packed<W: Write>(w: &mut W, t: &Tensor) -> Result<()> {
    w.write_all(&pack_ternary(t.as_slice())?)?;
    Ok(())
}

/// Serialize a model in the weight-file layout.
pub fn write_weights<W: Write>(model: &BitNetModel, mut w: W) -> Result<()> {
    let c = &model.config;
    w.write_all(&WEIGHTS_MAGIC)?;
    w.write_u32::<LittleEndian>(WEIGHTS_VERSION)?;
    for v in [
        c.vocab_size,
        c.hidden_size,
        c.num_attention_heads,
        c.num_key_value_heads,
        c.num_hidden_layers,
        c.intermediate_size,
        c.max_position_embeddings,
        c.eos_token_id,
    ] {
        let v = u32::try_from(v).map_err(|_| {
            BitNetError::InvalidConfig(format!("{v} does not fit the u32 header field"))
        })?;
        w.write_u32::<LittleEndian>(v)?;
    }
    w.write_f32::<LittleEndian>(c.norm_eps)?;
    w.write_f32::<LittleEndian>(c.rope_theta)?;
    w.write_u32::<LittleEndian>(if c.use_rope { FLAG_ROPE } else { 0 })?;

    for block in &model.blocks {
        write_gamma(&mut w, block.attention.norm())?;
        for t in block.attention.weight_refs() {
            write_packed(&mut w, t)?;
        }
        write_gamma(&mut w, block.ffn.norm())?;
        write_packed(&mut w, &block.ffn.weights().up)?;
        write_packed(&mut w, &block.ffn.weights().down)?;
    }
    write_packed(&mut w, &model.embedding)?;
    write_gamma(&mut w, &model.norm)?;
    w.flush()?;
    Ok(())
}

/// Save a model to a weight file.
pub fn save_weights(model: &BitNetModel, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_weights(model, BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::create_demo_model_seeded;

    fn demo_bytes() -> (BitNetModel, Vec<u8>) {
        let model = create_demo_model_seeded(7).unwrap();
        let mut bytes = Vec::new();
        write_weights(&model, &mut bytes).unwrap();
        (model, bytes)
    }

    #[test]
    fn write_then_read_restores_weights() {
        let (model, bytes) = demo_bytes();
        let loaded = read_weights(bytes.as_slice()).unwrap();
        assert_eq!(loaded.config, model.config);
        assert_eq!(loaded.embedding, model.embedding);
        assert_eq!(loaded.norm, model.norm);
        assert_eq!(
            loaded.blocks[1].ffn.weights().down,
            model.blocks[1].ffn.weights().down
        );
    }

    #[test]
    fn bad_magic() {
        let (_, mut bytes) = demo_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
    }

    #[test]
    fn unsupported_version() {
        let (_, mut bytes) = demo_bytes();
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn truncated_stream() {
        let (_, bytes) = demo_bytes();
        for cut in [2, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                matches!(
                    read_weights(&bytes[..cut]),
                    Err(BitNetError::InvalidWeightsFormat(_))
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn trailing_bytes() {
        let (_, mut bytes) = demo_bytes();
        bytes.push(0);
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
    }

    fn header(layers: u32, max_positions: u32, flags: u32) -> Vec<u8> {
        let mut bytes = WEIGHTS_MAGIC.to_vec();
        for v in [WEIGHTS_VERSION, 256, 64, 4, 2, layers, 128, max_positions, 255] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&1e-5f32.to_le_bytes());
        bytes.extend_from_slice(&10_000f32.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes
    }

    #[test]
    fn huge_layer_count_is_a_format_error() {
        let bytes = header(u32::MAX, 128, 0);
        assert_eq!(bytes.len(), 52);
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
    }

    #[test]
    fn huge_rope_table_is_a_format_error() {
        let bytes = header(1, u32::MAX, FLAG_ROPE);
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
    }

    #[test]
    fn rope_header_without_blocks_is_truncated() {
        let bytes = header(2, 4096, FLAG_ROPE);
        assert!(matches!(
            read_weights(bytes.as_slice()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
    }

    #[test]
    fn missing_file() {
        let path = std::env::temp_dir().join("bitnet_int8_does_not_exist.bn58");
        assert!(matches!(
            load_weights(&path),
            Err(BitNetError::WeightsFileRead(_))
        ));
    }
}
