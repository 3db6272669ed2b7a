//! Huffman-shaped wavelet tree.
//!
//! Each internal node of the code tree stores one bit per symbol routed
//! through it. `rank` and `access` descend one node per code bit, so
//! frequent symbols are answered fastest.

use super::bits::{BitBuf, RankBitVec};
use super::huffman::HuffmanCode;
use super::rle::BwtFileSet;
use crate::error::BwtError;
use crate::text::Histogram;
use crate::utils::{WorkspaceContext, read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic number for wavelet tree files
pub const HWT_MAGIC: u32 = 0x54574842; // "BHWT" in little-endian

/// Current version of the wavelet tree format
pub const HWT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Child {
    Empty,
    Node(u32),
    Leaf(u8),
}

#[derive(Debug, Clone)]
struct WtNode {
    bits: RankBitVec,
    children: [Child; 2],
}

#[derive(Debug, Clone)]
pub struct HuffmanWaveletTree {
    code: HuffmanCode,
    nodes: Vec<WtNode>,
    len: u64,
}

/// Child links of the code tree; node 0 is the root
fn code_shape(code: &HuffmanCode) -> Vec<[Child; 2]> {
    let mut shape = vec![[Child::Empty; 2]];
    for symbol in 0..=255u8 {
        let len = code.len_of(symbol);
        let mut node = 0usize;
        for depth in 0..len {
            let bit = code.bit(symbol, depth) as usize;
            if depth + 1 == len {
                shape[node][bit] = Child::Leaf(symbol);
            } else if let Child::Node(next) = shape[node][bit] {
                node = next as usize;
            } else {
                let next = shape.len();
                shape.push([Child::Empty; 2]);
                shape[node][bit] = Child::Node(next as u32);
                node = next;
            }
        }
    }
    shape
}

impl HuffmanWaveletTree {
    /// Build over the symbols of a BWT file set
    pub fn build(bwt: &BwtFileSet, code: &HuffmanCode) -> Result<Self> {
        let shape = code_shape(code);
        let mut bufs: Vec<BitBuf> = vec![BitBuf::new(); shape.len()];
        let mut cursor = bwt.cursor()?;
        let mut len = 0u64;

        while let Some((symbol, run)) = cursor.next_run(u64::MAX)? {
            let code_len = code.len_of(symbol);
            if code_len == 0 {
                bail!("symbol {symbol:#04x} has no code in the global histogram");
            }
            for _ in 0..run {
                let mut node = 0usize;
                for depth in 0..code_len {
                    let bit = code.bit(symbol, depth);
                    bufs[node].push(bit);
                    if let Child::Node(next) = shape[node][bit as usize] {
                        node = next as usize;
                    }
                }
            }
            len += run;
        }

        let nodes = bufs
            .into_iter()
            .zip(shape)
            .map(|(bits, children)| WtNode {
                bits: RankBitVec::new(bits),
                children,
            })
            .collect();
        Ok(Self {
            code: code.clone(),
            nodes,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn code(&self) -> &HuffmanCode {
        &self.code
    }

    /// Occurrences of `symbol` in `[0, i)`
    pub fn rank(&self, symbol: u8, i: u64) -> u64 {
        let code_len = self.code.len_of(symbol);
        if code_len == 0 {
            return 0;
        }
        let mut node = 0usize;
        let mut r = i;
        for depth in 0..code_len {
            let bits = &self.nodes[node].bits;
            let bit = self.code.bit(symbol, depth);
            r = if bit { bits.rank1(r) } else { bits.rank0(r) };
            match self.nodes[node].children[bit as usize] {
                Child::Node(next) => node = next as usize,
                _ => break,
            }
        }
        r
    }

    /// Symbol at `i` together with its rank `rank(symbol, i)`
    pub fn access_rank(&self, i: u64) -> Option<(u8, u64)> {
        if i >= self.len {
            return None;
        }
        let mut node = 0usize;
        let mut pos = i;
        loop {
            let bits = &self.nodes[node].bits;
            let bit = bits.get(pos);
            pos = if bit { bits.rank1(pos) } else { bits.rank0(pos) };
            match self.nodes[node].children[bit as usize] {
                Child::Node(next) => node = next as usize,
                Child::Leaf(symbol) => return Some((symbol, pos)),
                Child::Empty => return None,
            }
        }
    }

    pub fn access(&self, i: u64) -> Option<u8> {
        self.access_rank(i).map(|(symbol, _)| symbol)
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.bits.size_in_bytes() + std::mem::size_of::<WtNode>() as u64)
            .sum::<u64>()
            + std::mem::size_of::<HuffmanCode>() as u64
    }

    /// Upper bound on [`size_in_bytes`](Self::size_in_bytes) of a tree
    /// whose nodes hold `payload_bits` bits in total
    pub fn estimated_size(payload_bits: u64) -> u64 {
        // A payload word and a rank word per 64 bits; each of at most 255
        // nodes rounds up one word and keeps one trailing rank entry
        let per_node = 24 + std::mem::size_of::<WtNode>() as u64;
        payload_bits.div_ceil(64) * 16 + 256 * per_node + std::mem::size_of::<HuffmanCode>() as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_u32_le(writer, HWT_MAGIC)?;
        write_u32_le(writer, HWT_VERSION)?;
        write_u64_le(writer, self.len)?;
        writer.write_all(self.code.lengths())?;
        write_u32_le(writer, self.nodes.len() as u32)?;
        for node in &self.nodes {
            node.bits.as_bits().write_to(writer)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R, name: &str) -> Result<Self> {
        let bad = |reason: String| BwtError::BadFile {
            file: name.to_string(),
            reason,
        };

        let magic = read_u32_le(reader)?;
        if magic != HWT_MAGIC {
            return Err(bad(format!("bad magic {magic:#010x}")).into());
        }
        let version = read_u32_le(reader)?;
        if version != HWT_VERSION {
            return Err(bad(format!("unsupported version {version}")).into());
        }
        let len = read_u64_le(reader)?;
        let mut lengths = [0u8; 256];
        reader.read_exact(&mut lengths)?;
        let code = HuffmanCode::from_lengths(lengths)?;

        let shape = code_shape(&code);
        let count = read_u32_le(reader)? as usize;
        if count != shape.len() {
            return Err(bad(format!("{count} nodes, code implies {}", shape.len())).into());
        }
        let mut nodes = Vec::with_capacity(count);
        for children in shape {
            let bits = BitBuf::read_from(reader)?;
            nodes.push(WtNode {
                bits: RankBitVec::new(bits),
                children,
            });
        }
        if nodes[0].bits.len() != len {
            return Err(bad(format!("root has {} bits, expected {len}", nodes[0].bits.len())).into());
        }
        Ok(Self { code, nodes, len })
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::with_capacity(65536, file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::read_from(&mut BufReader::new(file), &path.display().to_string())
    }
}

/// A deferred wavelet tree construction, stored as JSON in the workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HwtBuildRequest {
    pub bwt: BwtFileSet,
    pub histogram: PathBuf,
    pub output: PathBuf,
}

impl HwtBuildRequest {
    /// Serialize the request into the workspace and return its path
    pub fn store(&self, ctx: &WorkspaceContext) -> Result<PathBuf> {
        let (path, file) = ctx.create("hwt-request", "json")?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Build the tree and write it to the requested output
    pub fn execute(&self) -> Result<HuffmanWaveletTree> {
        let hist = Histogram::read_file(&self.histogram)?;
        let code = HuffmanCode::from_histogram(&hist)?;
        let tree = HuffmanWaveletTree::build(&self.bwt, &code)?;
        tree.write_file(&self.output)?;
        log::info!(
            "Wrote wavelet tree {} ({} bytes in memory)",
            self.output.display(),
            tree.size_in_bytes()
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tree_over(ctx: &WorkspaceContext, symbols: &[u8]) -> HuffmanWaveletTree {
        let set = BwtFileSet::write_bytes(ctx, "wt", symbols).unwrap();
        let code = HuffmanCode::from_histogram(&Histogram::of(symbols)).unwrap();
        HuffmanWaveletTree::build(&set, &code).unwrap()
    }

    #[test]
    fn test_rank_and_access_match_naive() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let symbols = b"abracadabra alakazam mississippi";
        let tree = tree_over(&ctx, symbols);
        assert_eq!(tree.len(), symbols.len() as u64);

        for i in 0..=symbols.len() {
            for &c in b"abcdkmlsipz " {
                let naive = symbols[..i].iter().filter(|&&s| s == c).count() as u64;
                assert_eq!(tree.rank(c, i as u64), naive, "rank({}, {i})", c as char);
            }
        }
        for (i, &s) in symbols.iter().enumerate() {
            let naive = symbols[..i].iter().filter(|&&x| x == s).count() as u64;
            assert_eq!(tree.access_rank(i as u64), Some((s, naive)));
        }
        assert_eq!(tree.access(symbols.len() as u64), None);
    }

    #[test]
    fn test_estimate_bounds_built_size() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let symbols: Vec<u8> = (0..20_000u32).map(|i| (i * i % 251) as u8).collect();
        let hist = Histogram::of(&symbols);
        let code = HuffmanCode::from_histogram(&hist).unwrap();
        let tree = tree_over(&ctx, &symbols);
        let payload: u64 = (0..=255u8)
            .map(|s| hist.count(s) * code.len_of(s) as u64)
            .sum();
        let estimate = HuffmanWaveletTree::estimated_size(payload);
        assert!(tree.size_in_bytes() <= estimate);
        // Not a loose bound either
        assert!(estimate < 2 * tree.size_in_bytes() + 256 * 64);
    }

    #[test]
    fn test_single_symbol_tree() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let tree = tree_over(&ctx, b"zzzzz");
        assert_eq!(tree.rank(b'z', 3), 3);
        assert_eq!(tree.rank(b'a', 3), 0);
        assert_eq!(tree.access(4), Some(b'z'));
    }

    #[test]
    fn test_file_roundtrip_preserves_queries() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let symbols = b"the quick brown fox jumps over the lazy dog";
        let tree = tree_over(&ctx, symbols);

        let path = parent.path().join("t.hwt");
        tree.write_file(&path).unwrap();
        let loaded = HuffmanWaveletTree::read_file(&path).unwrap();
        for i in 0..symbols.len() as u64 {
            assert_eq!(loaded.access_rank(i), tree.access_rank(i));
        }
    }

    #[test]
    fn test_build_request_executes() {
        let parent = tempdir().unwrap();
        let ctx = WorkspaceContext::new(parent.path()).unwrap();
        let symbols = b"annb$aa";
        let bwt = BwtFileSet::write_bytes(&ctx, "bwt", symbols).unwrap();
        let histogram = ctx.unique_path("text", "hist");
        Histogram::of(symbols).write_file(&histogram).unwrap();

        let request = HwtBuildRequest {
            bwt,
            histogram,
            output: parent.path().join("out.hwt"),
        };
        let stored = request.store(&ctx).unwrap();
        let tree = HwtBuildRequest::load(&stored).unwrap().execute().unwrap();
        assert_eq!(tree.rank(b'a', 7), 3);
        assert!(parent.path().join("out.hwt").exists());
    }
}
