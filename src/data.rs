//! Data Loading and Management
//!
//! Loads plant, organism and fungi tables with Polars (parquet or CSV by
//! extension) and projects them once into typed records. The resulting
//! [`GuildData`] is immutable and shared by every scoring request.

use anyhow::{Context, Result};
use polars::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::config::ScorerConfig;
use crate::types::{clean_names, ClimateZone, FungalProfile, GuildMember, OrganismProfile, Plant, ZoneSet};

/// Pest → known control agents (predators, entomopathogens or antagonists)
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    map: FxHashMap<String, Vec<String>>,
    /// Every organism listed as an agent for some pest
    agents: FxHashSet<String>,
}

impl LookupTable {
    pub fn new(mut map: FxHashMap<String, Vec<String>>) -> Self {
        for values in map.values_mut() {
            clean_names(values);
        }
        map.retain(|_, values| !values.is_empty());
        let agents = map.values().flatten().cloned().collect();
        LookupTable { map, agents }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.map.get(key).map(Vec::as_slice)
    }

    pub fn is_agent(&self, organism: &str) -> bool {
        self.agents.contains(organism)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Main data holder for guild scoring
pub struct GuildData {
    /// Plant metadata (CSR, heights, Köppen tiers), keyed by WFO id
    pub plants: FxHashMap<String, Plant>,

    /// Plant-organism associations (herbivores, pollinators, etc.)
    pub organisms: FxHashMap<String, OrganismProfile>,

    /// Plant-fungi associations (pathogens, AMF, EMF, etc.)
    pub fungi: FxHashMap<String, FungalProfile>,

    /// Herbivore → predators
    pub herbivore_predators: LookupTable,

    /// Herbivore → entomopathogenic fungi
    pub insect_parasites: LookupTable,

    /// Pathogen → antagonists (mycoparasites or fungivores)
    pub pathogen_antagonists: LookupTable,

    /// Every fungus recorded as pathogenic on any plant
    pub pathogenic_fungi: FxHashSet<String>,
}

impl GuildData {
    /// Load all datasets named in the config
    pub fn load(config: &ScorerConfig) -> Result<Self> {
        info!(data_dir = ?config.data_dir, "Loading datasets");

        let plants_df = read_frame(&config.resolve(&config.plants_path))?;
        let plants = plants_from_frame(&plants_df).context("Failed to parse plants table")?;

        let organisms_df = read_frame(&config.resolve(&config.organisms_path))?;
        let organisms = organisms_from_frame(&organisms_df).context("Failed to parse organisms table")?;

        let fungi_df = read_frame(&config.resolve(&config.fungi_path))?;
        let fungi = fungi_from_frame(&fungi_df).context("Failed to parse fungi table")?;

        // Biocontrol lookup tables
        let herbivore_predators = load_lookup_table(
            &config.resolve(&config.herbivore_predators_path),
            "herbivore",
            "predators",
        )?;
        let insect_parasites = load_lookup_table(
            &config.resolve(&config.insect_parasites_path),
            "herbivore",
            "entomopathogenic_fungi",
        )?;
        let pathogen_antagonists = load_lookup_table(
            &config.resolve(&config.pathogen_antagonists_path),
            "pathogen",
            "antagonists",
        )?;

        let data = GuildData::from_records(
            plants,
            organisms,
            fungi,
            herbivore_predators,
            insect_parasites,
            pathogen_antagonists,
        );

        info!(
            plants = data.plants.len(),
            organisms = data.organisms.len(),
            fungi = data.fungi.len(),
            herbivore_predators = data.herbivore_predators.len(),
            insect_parasites = data.insect_parasites.len(),
            pathogen_antagonists = data.pathogen_antagonists.len(),
            "Datasets loaded"
        );

        Ok(data)
    }

    /// Build from in-memory records, applying load-time normalization:
    /// CSR rescaled to 0-100 when the whole table is on 0-1, growth forms
    /// trimmed and lower-cased, interaction lists cleaned and sorted.
    pub fn from_records(
        mut plants: Vec<Plant>,
        organisms: Vec<(String, OrganismProfile)>,
        fungi: Vec<(String, FungalProfile)>,
        herbivore_predators: LookupTable,
        insect_parasites: LookupTable,
        pathogen_antagonists: LookupTable,
    ) -> Self {
        normalize_plants(&mut plants);

        let mut plant_map: FxHashMap<String, Plant> = FxHashMap::default();
        for plant in plants {
            if plant_map.contains_key(&plant.id) {
                warn!(plant_id = %plant.id, "Duplicate plant row, keeping the first");
                continue;
            }
            plant_map.insert(plant.id.clone(), plant);
        }

        let organisms: FxHashMap<String, OrganismProfile> = organisms
            .into_iter()
            .map(|(id, mut profile)| {
                profile.normalize();
                (id, profile)
            })
            .collect();

        let fungi: FxHashMap<String, FungalProfile> = fungi
            .into_iter()
            .map(|(id, mut profile)| {
                profile.normalize();
                (id, profile)
            })
            .collect();

        let pathogenic_fungi = fungi
            .values()
            .flat_map(|profile| profile.pathogenic.iter().cloned())
            .collect();

        GuildData {
            plants: plant_map,
            organisms,
            fungi,
            herbivore_predators,
            insect_parasites,
            pathogen_antagonists,
            pathogenic_fungi,
        }
    }

    /// Plant with its interaction records, if the id is known
    pub fn member(&self, plant_id: &str) -> Option<GuildMember<'_>> {
        let plant = self.plants.get(plant_id)?;
        Some(GuildMember {
            plant,
            organisms: self.organisms.get(plant_id),
            fungi: self.fungi.get(plant_id),
        })
    }

    /// Sorted ids of every plant flagged for `zone`
    pub fn zone_pool(&self, zone: ClimateZone) -> Vec<String> {
        let mut ids: Vec<String> = self
            .plants
            .values()
            .filter(|plant| plant.zones.contains(zone))
            .map(|plant| plant.id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Plants with all three CSR scores present
    pub fn plants_with_complete_csr(&self) -> impl Iterator<Item = &Plant> {
        self.plants
            .values()
            .filter(|p| p.csr_c.is_some() && p.csr_s.is_some() && p.csr_r.is_some())
    }
}

/// One-time CSR scale fix and growth form cleanup
fn normalize_plants(plants: &mut [Plant]) {
    let mut csr_values = plants
        .iter()
        .flat_map(|p| [p.csr_c, p.csr_s, p.csr_r])
        .flatten()
        .peekable();
    let unit_scale = csr_values.peek().is_some() && csr_values.all(|v| v <= 1.0);
    if unit_scale {
        info!("CSR scores are on a 0-1 scale, rescaling to 0-100");
    }

    for plant in plants.iter_mut() {
        if unit_scale {
            for value in [&mut plant.csr_c, &mut plant.csr_s, &mut plant.csr_r].into_iter().flatten() {
                *value *= 100.0;
            }
        }
        plant.growth_form = plant
            .growth_form
            .take()
            .map(|form| form.trim().to_lowercase())
            .filter(|form| !form.is_empty());
    }
}

/// Read a parquet or CSV file, chosen by extension
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    let is_parquet = path.extension().is_some_and(|ext| ext == "parquet");
    if is_parquet {
        LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to scan parquet: {:?}", path))?
            .collect()
            .with_context(|| format!("Failed to load parquet: {:?}", path))
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.into()))
            .with_context(|| format!("Failed to create CSV reader: {:?}", path))?
            .finish()
            .with_context(|| format!("Failed to load CSV: {:?}", path))
    }
}

/// Load lookup table: Key → Pipe-separated values
///
/// Example: herbivore_id → "predator1|predator2|predator3"
pub fn load_lookup_table(path: &Path, key_col: &str, value_col: &str) -> Result<LookupTable> {
    let df = read_frame(path)?;

    let key_series = df
        .column(key_col)
        .with_context(|| format!("Column '{}' not found", key_col))?
        .str()
        .with_context(|| format!("Column '{}' is not string type", key_col))?;
    let values = list_values(&df, value_col)?;

    let mut map: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (key, values) in key_series.into_iter().zip(values) {
        if let Some(key) = key {
            if !values.is_empty() {
                map.entry(key.to_string()).or_default().extend(values);
            }
        }
    }

    Ok(LookupTable::new(map))
}

/// Parse the plants table into records (before normalization)
pub fn plants_from_frame(df: &DataFrame) -> Result<Vec<Plant>> {
    let ids = required_str(df, "wfo_taxon_id")?;
    let names = optional_str(df, "wfo_scientific_name")?;
    let families = optional_str(df, "family")?;
    let genera = optional_str(df, "genus")?;
    let heights = first_f64(df, &["height_m"])?;
    let forms = optional_str(df, "try_growth_form")?;
    let csr_c = first_f64(df, &["C", "CSR_C"])?;
    let csr_s = first_f64(df, &["S", "CSR_S"])?;
    let csr_r = first_f64(df, &["R", "CSR_R"])?;
    let light = first_f64(df, &["EIVEres-L_complete", "EIVEres-L", "light_pref"])?;

    let mut tiers: Vec<(ClimateZone, Vec<Option<f64>>)> = Vec::new();
    for zone in ClimateZone::ALL {
        if df.column(zone.as_str()).is_ok() {
            tiers.push((zone, first_f64(df, &[zone.as_str()])?));
        }
    }

    let mut plants = Vec::with_capacity(df.height());
    for (idx, id) in ids.into_iter().enumerate() {
        let Some(id) = id else {
            continue;
        };
        let mut plant = Plant::new(id.clone(), names[idx].clone().unwrap_or(id));
        plant.family = families[idx].clone();
        plant.genus = genera[idx].clone();
        plant.height_m = heights[idx];
        plant.growth_form = forms[idx].clone();
        plant.csr_c = csr_c[idx];
        plant.csr_s = csr_s[idx];
        plant.csr_r = csr_r[idx];
        plant.light_pref = light[idx];

        let mut zones = ZoneSet::empty();
        for (zone, flags) in &tiers {
            if flags[idx].is_some_and(|flag| flag > 0.0) {
                zones.insert(*zone);
            }
        }
        plant.zones = zones;
        plants.push(plant);
    }

    Ok(plants)
}

/// Parse the organisms table, keyed by plant id
pub fn organisms_from_frame(df: &DataFrame) -> Result<Vec<(String, OrganismProfile)>> {
    let ids = required_str(df, "plant_wfo_id")?;
    let mut herbivores = list_values(df, "herbivores")?.into_iter();
    let mut pollinators = list_values(df, "pollinators")?.into_iter();
    let mut has_host = list_values(df, "predators_hasHost")?.into_iter();
    let mut interacts_with = list_values(df, "predators_interactsWith")?.into_iter();
    let mut adjacent_to = list_values(df, "predators_adjacentTo")?.into_iter();
    let mut fungivores = list_values(df, "fungivores_eats")?.into_iter();

    let mut profiles = Vec::with_capacity(df.height());
    for id in ids {
        let profile = OrganismProfile {
            herbivores: herbivores.next().unwrap_or_default(),
            pollinators: pollinators.next().unwrap_or_default(),
            predators_has_host: has_host.next().unwrap_or_default(),
            predators_interacts_with: interacts_with.next().unwrap_or_default(),
            predators_adjacent_to: adjacent_to.next().unwrap_or_default(),
            fungivores: fungivores.next().unwrap_or_default(),
        };
        if let Some(id) = id {
            profiles.push((id, profile));
        }
    }
    Ok(profiles)
}

/// Parse the fungal guilds table, keyed by plant id
pub fn fungi_from_frame(df: &DataFrame) -> Result<Vec<(String, FungalProfile)>> {
    let ids = required_str(df, "plant_wfo_id")?;
    let mut pathogenic = list_values(df, "pathogenic_fungi")?.into_iter();
    let mut amf = list_values(df, "amf_fungi")?.into_iter();
    let mut emf = list_values(df, "emf_fungi")?.into_iter();
    let mut endophytic = list_values(df, "endophytic_fungi")?.into_iter();
    let mut saprotrophic = list_values(df, "saprotrophic_fungi")?.into_iter();
    let mut mycoparasitic = list_values(df, "mycoparasite_fungi")?.into_iter();
    let mut entomopathogenic = list_values(df, "entomopathogenic_fungi")?.into_iter();

    let mut profiles = Vec::with_capacity(df.height());
    for id in ids {
        let profile = FungalProfile {
            pathogenic: pathogenic.next().unwrap_or_default(),
            amf: amf.next().unwrap_or_default(),
            emf: emf.next().unwrap_or_default(),
            endophytic: endophytic.next().unwrap_or_default(),
            saprotrophic: saprotrophic.next().unwrap_or_default(),
            mycoparasitic: mycoparasitic.next().unwrap_or_default(),
            entomopathogenic: entomopathogenic.next().unwrap_or_default(),
        };
        if let Some(id) = id {
            profiles.push((id, profile));
        }
    }
    Ok(profiles)
}

fn required_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let values = df
        .column(name)
        .with_context(|| format!("Column '{}' not found", name))?
        .str()
        .with_context(|| format!("Column '{}' is not string type", name))?
        .into_iter()
        .map(|opt| opt.map(|s| s.to_string()))
        .collect();
    Ok(values)
}

/// String column, all `None` when absent
fn optional_str(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    if df.column(name).is_err() {
        return Ok(vec![None; df.height()]);
    }
    required_str(df, name)
}

/// First present column among `names`, cast to f64; all `None` when none exist
fn first_f64(df: &DataFrame, names: &[&str]) -> Result<Vec<Option<f64>>> {
    let Some(column) = names.iter().find_map(|name| df.column(name).ok()) else {
        return Ok(vec![None; df.height()]);
    };
    let cast = column
        .cast(&DataType::Float64)
        .with_context(|| format!("Column '{}' is not numeric", column.name()))?;
    let values = cast.f64()?.into_iter().map(|v| v.filter(|x| x.is_finite())).collect();
    Ok(values)
}

/// List column (parquet) or pipe-separated strings (CSV); empty when absent
fn list_values(df: &DataFrame, name: &str) -> Result<Vec<Vec<String>>> {
    let height = df.height();
    let Ok(column) = df.column(name) else {
        return Ok(vec![Vec::new(); height]);
    };

    // Phase 0-4 parquets use Arrow list columns
    if let Ok(list_col) = column.list() {
        let mut rows = Vec::with_capacity(height);
        for idx in 0..height {
            let values = match list_col.get_as_series(idx) {
                Some(series) if !series.is_empty() => series
                    .str()
                    .with_context(|| format!("Column '{}' is not a list of strings", name))?
                    .into_iter()
                    .flatten()
                    .map(|s| s.to_string())
                    .collect(),
                _ => Vec::new(),
            };
            rows.push(values);
        }
        return Ok(rows);
    }

    // Fallback: pipe-separated strings (legacy format)
    let str_col = column
        .str()
        .with_context(|| format!("Column '{}' is neither a list nor a string column", name))?;
    Ok(str_col.into_iter().map(|value| split_pipe(value.unwrap_or(""))).collect())
}

fn split_pipe(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
