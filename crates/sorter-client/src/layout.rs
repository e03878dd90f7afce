//! 料仓布局
//!
//! 布局是静态的三级结构：层 → 分区 → 料仓。每个料仓最多归属一个分类，
//! 分类在第一次需要时才认领空料仓，认领结果立即持久化。

use crate::error::ClientError;
use sorter_tools::{BinCategories, LayerSection, MISC_CATEGORY, MachineStore};
use std::fmt;
use tracing::{info, warn};

/// 料仓地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinAddress {
    pub layer_index: usize,
    pub section_index: usize,
    pub bin_index: usize,
}

impl BinAddress {
    pub fn new(layer_index: usize, section_index: usize, bin_index: usize) -> Self {
        Self {
            layer_index,
            section_index,
            bin_index,
        }
    }
}

impl fmt::Display for BinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.layer_index, self.section_index, self.bin_index
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bin {
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub bins: Vec<Bin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionLayout {
    pub layers: Vec<Layer>,
}

impl DistributionLayout {
    /// 由每层每个分区的料仓数构造（全部未分配）
    pub fn from_bins_per_section(layers: &[Vec<usize>]) -> Result<Self, ClientError> {
        if layers.is_empty() {
            return Err(ClientError::InvalidLayout("layout has no layers".into()));
        }
        let mut built = Vec::with_capacity(layers.len());
        for (layer_index, sections) in layers.iter().enumerate() {
            if sections.is_empty() {
                return Err(ClientError::InvalidLayout(format!(
                    "layer {} has no sections",
                    layer_index
                )));
            }
            if let Some(section_index) = sections.iter().position(|&n| n == 0) {
                return Err(ClientError::InvalidLayout(format!(
                    "layer {} section {} has no bins",
                    layer_index, section_index
                )));
            }
            built.push(Layer {
                sections: sections
                    .iter()
                    .map(|&n| Section {
                        bins: vec![Bin::default(); n],
                    })
                    .collect(),
            });
        }
        Ok(Self { layers: built })
    }

    pub fn from_config(layers: &[LayerSection]) -> Result<Self, ClientError> {
        let shape: Vec<Vec<usize>> = layers
            .iter()
            .map(|layer| layer.bins_per_section.clone())
            .collect();
        Self::from_bins_per_section(&shape)
    }

    /// 从持久化表恢复分类
    ///
    /// 形状与当前布局不一致时放弃恢复并返回 `false`。
    pub fn apply_categories(&mut self, categories: &BinCategories) -> bool {
        let matches = categories.len() == self.layers.len()
            && self.layers.iter().zip(categories).all(|(layer, saved)| {
                layer.sections.len() == saved.len()
                    && layer
                        .sections
                        .iter()
                        .zip(saved)
                        .all(|(section, bins)| section.bins.len() == bins.len())
            });
        if !matches {
            warn!("Saved bin categories do not match the layout shape, ignoring them");
            return false;
        }

        for (layer, saved) in self.layers.iter_mut().zip(categories) {
            for (section, bins) in layer.sections.iter_mut().zip(saved) {
                for (bin, category) in section.bins.iter_mut().zip(bins) {
                    bin.category_id = category.clone();
                }
            }
        }
        true
    }

    /// 导出分类表
    pub fn categories(&self) -> BinCategories {
        self.layers
            .iter()
            .map(|layer| {
                layer
                    .sections
                    .iter()
                    .map(|section| section.bins.iter().map(|b| b.category_id.clone()).collect())
                    .collect()
            })
            .collect()
    }

    pub fn bin(&self, address: BinAddress) -> Option<&Bin> {
        self.layers
            .get(address.layer_index)?
            .sections
            .get(address.section_index)?
            .bins
            .get(address.bin_index)
    }

    fn bin_mut(&mut self, address: BinAddress) -> Option<&mut Bin> {
        self.layers
            .get_mut(address.layer_index)?
            .sections
            .get_mut(address.section_index)?
            .bins
            .get_mut(address.bin_index)
    }

    /// 地址所在分区的料仓数
    pub fn bins_in_section(&self, address: BinAddress) -> Option<usize> {
        self.layers
            .get(address.layer_index)?
            .sections
            .get(address.section_index)
            .map(|section| section.bins.len())
    }

    pub fn contains(&self, address: BinAddress) -> bool {
        self.bin(address).is_some()
    }

    /// 按层、分区、料仓顺序遍历所有地址
    pub fn addresses(&self) -> impl Iterator<Item = BinAddress> + '_ {
        self.layers.iter().enumerate().flat_map(|(l, layer)| {
            layer.sections.iter().enumerate().flat_map(move |(s, section)| {
                (0..section.bins.len()).map(move |b| BinAddress::new(l, s, b))
            })
        })
    }

    pub fn bin_count(&self) -> usize {
        self.addresses().count()
    }

    /// 第一个属于该分类的料仓
    pub fn find_bin(&self, category_id: &str) -> Option<BinAddress> {
        self.addresses().find(|&address| {
            self.bin(address)
                .and_then(|bin| bin.category_id.as_deref())
                == Some(category_id)
        })
    }

    /// 查找或认领料仓
    ///
    /// 1. 已有属于该分类的料仓 → 返回它
    /// 2. 否则认领第一个未分配的料仓，并持久化分类表
    /// 3. 否则退回到 "misc" 分类重复上述过程
    ///
    /// 全部失败时返回 `Ok(None)`。
    pub fn find_or_assign(
        &mut self,
        category_id: &str,
        store: &dyn MachineStore,
    ) -> Result<Option<BinAddress>, ClientError> {
        if let Some(address) = self.find_bin(category_id) {
            return Ok(Some(address));
        }

        let free = self.addresses().find(|&address| {
            self.bin(address)
                .is_some_and(|bin| bin.category_id.is_none())
        });
        if let Some(address) = free {
            if let Some(bin) = self.bin_mut(address) {
                bin.category_id = Some(category_id.to_string());
            }
            if let Err(e) = store.set_bin_categories(&self.categories()) {
                if let Some(bin) = self.bin_mut(address) {
                    bin.category_id = None;
                }
                return Err(e.into());
            }
            info!("Assigned bin {} to category '{}'", address, category_id);
            return Ok(Some(address));
        }

        if category_id != MISC_CATEGORY {
            warn!(
                "No bin available for category '{}', falling back to '{}'",
                category_id, MISC_CATEGORY
            );
            return self.find_or_assign(MISC_CATEGORY, store);
        }
        Ok(None)
    }
}
