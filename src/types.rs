//! Typed plant, organism and fungus records
//!
//! Source tables are projected into these records once at load time. Metric
//! code only ever sees a [`GuildMember`] slice, never the raw frames.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Field names used in error messages and required-field declarations
pub mod fields {
    pub const CSR_C: &str = "CSR_C";
    pub const CSR_S: &str = "CSR_S";
    pub const CSR_R: &str = "CSR_R";
    pub const HEIGHT: &str = "height_m";
    pub const GROWTH_FORM: &str = "try_growth_form";
    pub const LIGHT: &str = "light_pref";
    pub const TREE_TIP: &str = "tree_tip";
}

/// Köppen-derived climate zones used to stratify calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClimateZone {
    #[serde(rename = "tier_1_tropical")]
    Tropical,
    #[serde(rename = "tier_2_mediterranean")]
    Mediterranean,
    #[serde(rename = "tier_3_humid_temperate")]
    HumidTemperate,
    #[serde(rename = "tier_4_continental")]
    Continental,
    #[serde(rename = "tier_5_boreal_polar")]
    BorealPolar,
    #[serde(rename = "tier_6_arid")]
    Arid,
}

impl ClimateZone {
    pub const ALL: [ClimateZone; 6] = [
        ClimateZone::Tropical,
        ClimateZone::Mediterranean,
        ClimateZone::HumidTemperate,
        ClimateZone::Continental,
        ClimateZone::BorealPolar,
        ClimateZone::Arid,
    ];

    /// Column / calibration key, e.g. `tier_3_humid_temperate`
    pub fn as_str(self) -> &'static str {
        match self {
            ClimateZone::Tropical => "tier_1_tropical",
            ClimateZone::Mediterranean => "tier_2_mediterranean",
            ClimateZone::HumidTemperate => "tier_3_humid_temperate",
            ClimateZone::Continental => "tier_4_continental",
            ClimateZone::BorealPolar => "tier_5_boreal_polar",
            ClimateZone::Arid => "tier_6_arid",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|zone| zone.as_str() == name)
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ClimateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership flags for the six climate zones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSet(u8);

impl ZoneSet {
    pub const ALL: ZoneSet = ZoneSet(0b11_1111);

    pub fn empty() -> Self {
        ZoneSet(0)
    }

    pub fn from_zones(zones: &[ClimateZone]) -> Self {
        let mut set = ZoneSet::empty();
        for zone in zones {
            set.insert(*zone);
        }
        set
    }

    pub fn insert(&mut self, zone: ClimateZone) {
        self.0 |= zone.bit();
    }

    pub fn contains(self, zone: ClimateZone) -> bool {
        self.0 & zone.bit() != 0
    }

    pub fn intersection(self, other: ZoneSet) -> ZoneSet {
        ZoneSet(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn zones(self) -> Vec<ClimateZone> {
        ClimateZone::ALL
            .into_iter()
            .filter(|zone| self.contains(*zone))
            .collect()
    }
}

/// Grime's CSR strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsrStrategy {
    #[serde(rename = "c")]
    Competitor,
    #[serde(rename = "s")]
    StressTolerator,
    #[serde(rename = "r")]
    Ruderal,
}

/// Plant metadata (CSR, height, growth form, light, climate zones)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: String,
    pub scientific_name: String,
    pub family: Option<String>,
    pub genus: Option<String>,
    /// CSR scores on the 0-100 scale
    pub csr_c: Option<f64>,
    pub csr_s: Option<f64>,
    pub csr_r: Option<f64>,
    pub height_m: Option<f64>,
    /// Trimmed, lower-cased TRY growth form
    pub growth_form: Option<String>,
    /// EIVE-L (0-10)
    pub light_pref: Option<f64>,
    pub zones: ZoneSet,
}

impl Plant {
    pub fn new(id: impl Into<String>, scientific_name: impl Into<String>) -> Self {
        Plant {
            id: id.into(),
            scientific_name: scientific_name.into(),
            family: None,
            genus: None,
            csr_c: None,
            csr_s: None,
            csr_r: None,
            height_m: None,
            growth_form: None,
            light_pref: None,
            zones: ZoneSet::empty(),
        }
    }

    pub fn csr(&self, strategy: CsrStrategy) -> Option<f64> {
        match strategy {
            CsrStrategy::Competitor => self.csr_c,
            CsrStrategy::StressTolerator => self.csr_s,
            CsrStrategy::Ruderal => self.csr_r,
        }
    }

    pub fn growth_form_str(&self) -> &str {
        self.growth_form.as_deref().unwrap_or("")
    }

    /// Climbers: any form mentioning vine or liana
    pub fn is_climber(&self) -> bool {
        let form = self.growth_form_str();
        form.contains("vine") || form.contains("liana")
    }

    pub fn is_tree(&self) -> bool {
        self.growth_form_str().contains("tree")
    }
}

/// Animal associations for one plant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganismProfile {
    pub herbivores: Vec<String>,
    pub pollinators: Vec<String>,
    pub predators_has_host: Vec<String>,
    pub predators_interacts_with: Vec<String>,
    pub predators_adjacent_to: Vec<String>,
    /// Animals recorded eating fungi on this plant
    pub fungivores: Vec<String>,
}

impl OrganismProfile {
    /// Union of all predator relation subtypes, sorted and deduplicated
    pub fn predators(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .predators_has_host
            .iter()
            .chain(&self.predators_interacts_with)
            .chain(&self.predators_adjacent_to)
            .cloned()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub(crate) fn normalize(&mut self) {
        for list in [
            &mut self.herbivores,
            &mut self.pollinators,
            &mut self.predators_has_host,
            &mut self.predators_interacts_with,
            &mut self.predators_adjacent_to,
            &mut self.fungivores,
        ] {
            clean_names(list);
        }
    }
}

/// Fungal associations for one plant, by FunGuild category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FungalProfile {
    pub pathogenic: Vec<String>,
    pub amf: Vec<String>,
    pub emf: Vec<String>,
    pub endophytic: Vec<String>,
    pub saprotrophic: Vec<String>,
    pub mycoparasitic: Vec<String>,
    pub entomopathogenic: Vec<String>,
}

impl FungalProfile {
    /// AMF, EMF, endophytic and saprotrophic fungi
    pub fn beneficial(&self) -> [&[String]; 4] {
        [
            self.amf.as_slice(),
            self.emf.as_slice(),
            self.endophytic.as_slice(),
            self.saprotrophic.as_slice(),
        ]
    }

    pub(crate) fn normalize(&mut self) {
        for list in [
            &mut self.pathogenic,
            &mut self.amf,
            &mut self.emf,
            &mut self.endophytic,
            &mut self.saprotrophic,
            &mut self.mycoparasitic,
            &mut self.entomopathogenic,
        ] {
            clean_names(list);
        }
    }
}

/// Trim, drop empties, sort, dedup
pub(crate) fn clean_names(list: &mut Vec<String>) {
    for name in list.iter_mut() {
        let trimmed = name.trim();
        if trimmed.len() != name.len() {
            *name = trimmed.to_string();
        }
    }
    list.retain(|name| !name.is_empty());
    list.sort_unstable();
    list.dedup();
}

/// One guild member with its (optional) interaction records
#[derive(Debug, Clone, Copy)]
pub struct GuildMember<'a> {
    pub plant: &'a Plant,
    pub organisms: Option<&'a OrganismProfile>,
    pub fungi: Option<&'a FungalProfile>,
}

impl<'a> GuildMember<'a> {
    pub fn id(&self) -> &'a str {
        &self.plant.id
    }

    pub fn herbivores(&self) -> &'a [String] {
        self.organisms.map(|o| o.herbivores.as_slice()).unwrap_or(&[])
    }

    pub fn pollinators(&self) -> &'a [String] {
        self.organisms.map(|o| o.pollinators.as_slice()).unwrap_or(&[])
    }

    pub fn fungivores(&self) -> &'a [String] {
        self.organisms.map(|o| o.fungivores.as_slice()).unwrap_or(&[])
    }

    pub fn predators(&self) -> Vec<String> {
        self.organisms.map(OrganismProfile::predators).unwrap_or_default()
    }

    /// The three predator subtype lists, unmerged
    pub fn predator_lists(&self) -> [&'a [String]; 3] {
        match self.organisms {
            Some(o) => [
                o.predators_has_host.as_slice(),
                o.predators_interacts_with.as_slice(),
                o.predators_adjacent_to.as_slice(),
            ],
            None => [&[][..]; 3],
        }
    }

    pub fn pathogens(&self) -> &'a [String] {
        self.fungi.map(|f| f.pathogenic.as_slice()).unwrap_or(&[])
    }

    pub fn mycoparasites(&self) -> &'a [String] {
        self.fungi.map(|f| f.mycoparasitic.as_slice()).unwrap_or(&[])
    }

    pub fn entomopathogens(&self) -> &'a [String] {
        self.fungi.map(|f| f.entomopathogenic.as_slice()).unwrap_or(&[])
    }

    pub fn beneficial_fungi(&self) -> [&'a [String]; 4] {
        match self.fungi {
            Some(f) => f.beneficial(),
            None => [&[][..]; 4],
        }
    }
}
