// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight and threshold loading from per-PE binary files.
//!
//! Every compute layer owns one weight bank per instance (split slice or
//! iteration). A bank holds one block of `conv_mem` bytes per memory
//! channel, allocated through the dispatcher so the accelerator can reach
//! it, and is filled from the files of the PEs wired to that channel:
//!
//! ```text
//!  {file}-{pe + ch·pe_per_channel}-weights.bin ─► words [pe·conv_w_mem, …)
//!  {file}-{pe + ch·pe_per_channel}-thres.bin   ─► words [pe_per_channel·conv_w_mem
//!                                                       + pe·conv_t_mem·shift, …)
//! ```
//!
//! Files are read through `memmap2`. Short weight files leave the rest of
//! the PE's words zero; a missing file is fatal.

use crate::RuntimeError;
use dispatcher::Dispatcher;
use memory_manager::DeviceMemory;
use model_ir::{graph::Validated, HardwareConfig, LayerDescriptor, LayerGraph};
use std::path::{Path, PathBuf};

const WORD_BYTES: usize = 8;

/// Read-only view of one parameter file.
struct ParamFile {
    map: Option<memmap2::Mmap>,
}

impl ParamFile {
    fn open(path: &Path) -> Result<Self, RuntimeError> {
        let file = std::fs::File::open(path).map_err(|e| RuntimeError::WeightLoadError {
            path: path.to_path_buf(),
            detail: format!("cannot open: {e}"),
        })?;
        let len = file
            .metadata()
            .map_err(|e| RuntimeError::WeightLoadError {
                path: path.to_path_buf(),
                detail: format!("cannot stat: {e}"),
            })?
            .len();
        if len == 0 {
            tracing::warn!("{} is empty, reading zeros", path.display());
            return Ok(Self { map: None });
        }
        // SAFETY: parameter files are not modified while the runtime
        // initialises; the map is dropped as soon as the bank is filled.
        let map = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
            RuntimeError::WeightLoadError {
                path: path.to_path_buf(),
                detail: format!("mmap failed: {e}"),
            }
        })?;
        Ok(Self { map: Some(map) })
    }

    /// Little-endian word `index`; zero past the end of the file.
    fn word(&self, index: usize) -> u64 {
        let Some(map) = &self.map else {
            return 0;
        };
        let start = index * WORD_BYTES;
        match map.get(start..start + WORD_BYTES) {
            Some(bytes) => {
                let mut word = [0u8; WORD_BYTES];
                word.copy_from_slice(bytes);
                u64::from_le_bytes(word)
            }
            None => 0,
        }
    }
}

fn store_word(block: &mut [u8], index: usize, value: u64) {
    let start = index * WORD_BYTES;
    if let Some(dst) = block.get_mut(start..start + WORD_BYTES) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

/// Packs `stride` consecutive words of a narrow first layer into one:
/// every later word is masked to `in_ch` bits and shifted in.
fn pack_words(words: impl Iterator<Item = u64>, in_ch: usize) -> u64 {
    let mask = if in_ch >= 64 { u64::MAX } else { (1u64 << in_ch) - 1 };
    let mut words = words;
    let mut packed = words.next().unwrap_or(0);
    for x in words {
        packed = packed.checked_shl(in_ch as u32).unwrap_or(0) | (x & mask);
    }
    packed
}

/// Fills weight banks from the layer document's parameter directory.
#[derive(Debug, Clone)]
pub struct WeightLoader {
    dir: PathBuf,
    skip: usize,
    hw: HardwareConfig,
}

impl WeightLoader {
    pub fn new(dir: PathBuf, skip: usize, hw: HardwareConfig) -> Self {
        Self { dir, skip, hw }
    }

    /// Loader for `graph`'s parameter directory, or `None` when the layer
    /// document does not use parameter files.
    pub fn for_graph(graph: &LayerGraph<Validated>) -> Option<Self> {
        graph.meta.use_binparams.then(|| {
            Self::new(
                graph.meta.binparam_dir.clone(),
                graph.meta.binparam_skip,
                graph.hardware,
            )
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, file_index: usize, pe: usize, kind: &str) -> PathBuf {
        self.dir.join(format!("{file_index}-{pe}-{kind}.bin"))
    }

    /// Loads every bank of `graph` into `dispatcher`; returns the number
    /// of banks installed.
    pub fn load_graph(
        &self,
        graph: &LayerGraph<Validated>,
        dispatcher: &mut dyn Dispatcher,
    ) -> Result<usize, RuntimeError> {
        let mut banks = 0;
        for layer in graph.iter_layers().filter(|l| l.kind.is_compute()) {
            for instance in 0..layer.weight_instances() {
                let bank = layer.weight_bank(instance);
                let channels = self.load_bank(layer, bank, dispatcher)?;
                dispatcher.install_weights(bank, channels);
                banks += 1;
            }
        }
        tracing::info!("loaded {banks} weight banks from {}", self.dir.display());
        Ok(banks)
    }

    /// Allocates and fills the per-channel blocks of `bank`.
    pub fn load_bank(
        &self,
        layer: &LayerDescriptor,
        bank: usize,
        dispatcher: &dyn Dispatcher,
    ) -> Result<Vec<Box<dyn DeviceMemory>>, RuntimeError> {
        let allocator = dispatcher.allocator();
        let file_index = self.skip + bank;
        (0..self.hw.mem_channels)
            .map(|channel| -> Result<Box<dyn DeviceMemory>, RuntimeError> {
                let mut block = allocator.allocate(layer.conv_mem)?;
                self.fill_channel(block.as_mut_slice(), layer, file_index, channel)?;
                Ok(block)
            })
            .collect()
    }

    fn fill_channel(
        &self,
        block: &mut [u8],
        layer: &LayerDescriptor,
        file_index: usize,
        channel: usize,
    ) -> Result<(), RuntimeError> {
        let ppc = self.hw.pe_per_channel();
        let shift = self.hw.threshold_words();
        let w_mem = layer.conv_w_mem;
        let t_mem = layer.conv_t_mem;
        let stride = layer.stride.max(1);
        let packed = file_index == 0 && layer.in_ch * stride < self.hw.max_simd;
        if packed {
            tracing::debug!(
                "packing {stride} words per entry for first layer ({} input channels)",
                layer.in_ch
            );
        }

        for pe in 0..ppc {
            let global_pe = pe + channel * ppc;

            let weights = ParamFile::open(&self.file(file_index, global_pe, "weights"))?;
            let base = pe * w_mem;
            if packed {
                for i in 0..w_mem / stride {
                    let group = (0..stride).map(|j| weights.word(i * stride + j));
                    store_word(block, base + i, pack_words(group, layer.in_ch));
                }
            } else {
                for i in 0..w_mem {
                    store_word(block, base + i, weights.word(i));
                }
            }

            let thresholds = ParamFile::open(&self.file(file_index, global_pe, "thres"))?;
            let base = ppc * w_mem;
            for entry in 0..t_mem {
                for j in 0..shift {
                    let word = thresholds.word(entry * shift + j);
                    store_word(block, base + (pe * t_mem + entry) * shift + j, word);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatcher::SoftwareBackend;

    const NETWORK_JSON: &str = r#"{
        "parameters": {
            "MAX_K": 3, "MAX_IFM_CH": 64, "MAX_IFM_DIM": 16,
            "MAX_OFM_CH": 64, "MAX_OFM_DIM": 16,
            "MAX_POOL_SIZE": 2, "MAX_POOL_STRIDE": 2,
            "MAX_SIMD": 8, "MAX_PE_CONV": 4, "MAX_PE_FC": 2, "MEM_CHANNELS": 2,
            "ACTIVATION_BITS": 2, "WEIGHTS_BITS": 1, "THRESHOLDS_BITS": 64,
            "MACC_BITS": 16, "DATAWIDTH": 64
        }
    }"#;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qnn-wl-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn words(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn read_word(block: &[u8], index: usize) -> u64 {
        let mut w = [0u8; 8];
        w.copy_from_slice(&block[index * 8..index * 8 + 8]);
        u64::from_le_bytes(w)
    }

    fn layer(hw: &HardwareConfig, in_ch: usize, stride: usize) -> LayerDescriptor {
        let mut l = LayerDescriptor::new(0, "conv_layer");
        l.kind = model_ir::LayerKind::CONV;
        l.kernel_dim = 1;
        l.stride = stride;
        l.in_ch = in_ch;
        l.ifm_ch = in_ch;
        l.conv_w_mem = hw.conv_weight_words(1);
        l.conv_t_mem = hw.conv_threshold_entries();
        l.conv_mem = 8 * hw.pe_per_channel() * (l.conv_w_mem + l.conv_t_mem * hw.threshold_words());
        l
    }

    fn write_pe_files(dir: &Path, file_index: usize, pes: usize) {
        for pe in 0..pes {
            let w = words(&[(pe as u64) << 8 | 1, 0xAA]);
            std::fs::write(dir.join(format!("{file_index}-{pe}-weights.bin")), w).unwrap();
            let t = words(&[100 + pe as u64, 200 + pe as u64]);
            std::fs::write(dir.join(format!("{file_index}-{pe}-thres.bin")), t).unwrap();
        }
    }

    #[test]
    fn test_bank_layout() {
        let hw = HardwareConfig::from_json(NETWORK_JSON).unwrap();
        let dir = scratch_dir("layout");
        write_pe_files(&dir, 3, 4);
        let l = layer(&hw, 64, 1);
        let loader = WeightLoader::new(dir.clone(), 0, hw);
        let sw = SoftwareBackend::new(hw);

        let bank = loader.load_bank(&l, 3, &sw).unwrap();
        assert_eq!(bank.len(), 2);
        let w = l.conv_w_mem;
        // Channel 1, local PE 1 is global PE 3.
        let ch1 = bank[1].as_slice();
        assert_eq!(read_word(ch1, w), 3 << 8 | 1);
        assert_eq!(read_word(ch1, w + 1), 0xAA);
        assert_eq!(read_word(ch1, w + 2), 0);
        // Thresholds of local PE 1 start after both PEs' weights.
        let t = 2 * w + l.conv_t_mem;
        assert_eq!(read_word(ch1, t), 103);
        assert_eq!(read_word(ch1, t + 1), 203);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let hw = HardwareConfig::from_json(NETWORK_JSON).unwrap();
        let dir = scratch_dir("missing");
        write_pe_files(&dir, 0, 3);
        let loader = WeightLoader::new(dir.clone(), 0, hw);
        let sw = SoftwareBackend::new(hw);
        let err = loader.load_bank(&layer(&hw, 64, 1), 0, &sw).unwrap_err();
        assert!(matches!(err, RuntimeError::WeightLoadError { .. }));
        assert!(err.to_string().contains("0-3-weights.bin"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_skip_offsets_file_index() {
        let hw = HardwareConfig::from_json(NETWORK_JSON).unwrap();
        let dir = scratch_dir("skip");
        write_pe_files(&dir, 7, 4);
        let loader = WeightLoader::new(dir.clone(), 5, hw);
        let sw = SoftwareBackend::new(hw);
        assert!(loader.load_bank(&layer(&hw, 64, 1), 2, &sw).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_first_layer_packing() {
        assert_eq!(pack_words([0b1, 0b1110, 0b0101].into_iter(), 2), 0b01_10_01);
        assert_eq!(pack_words([7].into_iter(), 3), 7);
    }

    #[test]
    fn test_packed_first_bank() {
        let hw = HardwareConfig::from_json(NETWORK_JSON).unwrap();
        let dir = scratch_dir("packed");
        for pe in 0..4 {
            let w = words(&[1, 2, 3, 1]);
            std::fs::write(dir.join(format!("0-{pe}-weights.bin")), w).unwrap();
            std::fs::write(dir.join(format!("0-{pe}-thres.bin")), b"").unwrap();
        }
        // 3 channels × stride 2 < SIMD 8 → pairs of words are packed.
        let l = layer(&hw, 3, 2);
        let loader = WeightLoader::new(dir.clone(), 0, hw);
        let sw = SoftwareBackend::new(hw);
        let bank = loader.load_bank(&l, 0, &sw).unwrap();
        let ch0 = bank[0].as_slice();
        assert_eq!(read_word(ch0, 0), 1 << 3 | 2);
        assert_eq!(read_word(ch0, 1), 3 << 3 | 1);
        assert_eq!(read_word(ch0, 2), 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
