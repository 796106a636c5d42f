//! Picks the patch that belongs to an image by fingerprint.

use crate::archive::Entry;
use crate::error::{Io, Manifest as ManifestError, MissingEntry, NoMatchingPatch, Result};
use crate::fingerprint::Fingerprint;
use crate::ips::Patcher;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Fingerprint to entry-name pairs, as stored in a JSON manifest:
///
/// ```json
/// { "1F373E00": "game/ff4.ips" }
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
#[serde(transparent)]
pub struct Manifest {
    pub patches: BTreeMap<String, String>,
}

impl Manifest {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).context(Io { path })?;
        serde_json::from_str(&text).context(ManifestError { path })
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Association {
    pub name: String,
    pub patch: Vec<u8>,
}

/// What a fingerprint says about an image.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ImageKind<'a> {
    /// An input some patch applies to.
    Original(&'a Association),
    /// A known result of patching, labelled with its name.
    Patched(&'a str),
    Unknown,
}

/// Exact-match table from image fingerprint to patch. Hex keys are stored
/// upper-case.
#[derive(Clone, Debug, Default)]
pub struct AssociationTable {
    entries: BTreeMap<String, Association>,
    outputs: BTreeMap<String, String>,
}

impl AssociationTable {
    pub fn new() -> Self {
        AssociationTable::default()
    }

    pub fn insert<K, N>(&mut self, fingerprint: K, name: N, patch: Vec<u8>)
    where
        K: AsRef<str>,
        N: Into<String>,
    {
        self.entries.insert(
            fingerprint.as_ref().to_uppercase(),
            Association {
                name: name.into(),
                patch,
            },
        );
    }

    pub fn get(&self, fingerprint: &str) -> Option<&Association> {
        self.entries.get(&fingerprint.to_uppercase())
    }

    /// Records the fingerprint of an already-patched image.
    pub fn insert_output<K, N>(&mut self, fingerprint: K, name: N)
    where
        K: AsRef<str>,
        N: Into<String>,
    {
        self.outputs
            .insert(fingerprint.as_ref().to_uppercase(), name.into());
    }

    pub fn classify(&self, fingerprint: &str) -> ImageKind<'_> {
        let key = fingerprint.to_uppercase();
        if let Some(association) = self.entries.get(&key) {
            ImageKind::Original(association)
        } else if let Some(name) = self.outputs.get(&key) {
            ImageKind::Patched(name)
        } else {
            ImageKind::Unknown
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves every manifest name against `entries`.
    pub fn from_manifest(manifest: &Manifest, entries: &[Entry]) -> Result<Self> {
        let mut table = AssociationTable::new();
        for (fingerprint, name) in &manifest.patches {
            let entry = entries
                .iter()
                .find(|e| &e.name == name)
                .context(MissingEntry { name: name.as_str() })?;
            table.insert(fingerprint, name.as_str(), entry.data.clone());
        }
        debug!("association table holds {} patches", table.len());
        Ok(table)
    }
}

pub struct PatchSelector<F> {
    table: AssociationTable,
    fingerprint: F,
    patcher: Patcher,
}

impl<F: Fingerprint> PatchSelector<F> {
    pub fn new(table: AssociationTable, fingerprint: F) -> Self {
        PatchSelector {
            table,
            fingerprint,
            patcher: Patcher::default(),
        }
    }

    /// Replaces the strict default engine configuration.
    pub fn with_patcher(mut self, patcher: Patcher) -> Self {
        self.patcher = patcher;
        self
    }

    pub fn classify(&self, image: &[u8]) -> ImageKind<'_> {
        self.table.classify(&self.fingerprint.fingerprint(image))
    }

    pub fn select(&self, image: &[u8]) -> Result<&Association> {
        let fingerprint = self.fingerprint.fingerprint(image);
        let association = self
            .table
            .get(&fingerprint)
            .context(NoMatchingPatch {
                fingerprint: fingerprint.as_str(),
            })?;
        info!("image {} matches {}", fingerprint, association.name);
        Ok(association)
    }

    pub fn apply(&self, image: &[u8]) -> Result<Vec<u8>> {
        let association = self.select(image)?;
        self.apply_association(association, image)
    }

    /// Applies an association already picked by [`PatchSelector::select`].
    pub fn apply_association(&self, association: &Association, image: &[u8]) -> Result<Vec<u8>> {
        self.patcher.apply(image, &association.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fingerprint::Crc32;
    use crate::ips::Terminator;
    use std::cell::Cell;

    #[test]
    fn keys_are_case_normalised() {
        let mut table = AssociationTable::new();
        table.insert("1f373e00", "ff4.ips", b"PATCHEOF".to_vec());
        assert!(table.get("1F373E00").is_some());
        assert!(table.get("1f373e00").is_some());
        assert!(table.get("1F373E01").is_none());
    }

    #[test]
    fn manifest_names_must_resolve() {
        let manifest: Manifest = serde_json::from_str(r#"{"00000000": "gone.ips"}"#).unwrap();
        match AssociationTable::from_manifest(&manifest, &[]) {
            Err(Error::MissingEntry { name }) => assert_eq!(name, "gone.ips"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn selects_and_applies_matching_patch() {
        let image = vec![0u8; 4];
        let mut table = AssociationTable::new();
        table.insert(
            Crc32.fingerprint(&image),
            "fix.ips",
            b"PATCH\x00\x00\x01\x00\x01\x99EOF".to_vec(),
        );
        let selector = PatchSelector::new(table, Crc32);

        assert_eq!(selector.select(&image).unwrap().name, "fix.ips");
        assert_eq!(selector.apply(&image).unwrap(), vec![0, 0x99, 0, 0]);
    }

    #[test]
    fn miss_reports_fingerprint() {
        let calls = Cell::new(0);
        let counting = |data: &[u8]| {
            calls.set(calls.get() + 1);
            format!("{:08X}", data.len())
        };
        let selector = PatchSelector::new(AssociationTable::new(), counting);

        match selector.apply(&[1, 2, 3]) {
            Err(Error::NoMatchingPatch { fingerprint }) => assert_eq!(fingerprint, "00000003"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn classifies_inputs_outputs_and_strangers() {
        let mut table = AssociationTable::new();
        table.insert("1F373E00", "ff4.ips", b"PATCHEOF".to_vec());
        table.insert_output("a7654321", "ff4-patched");

        match table.classify("1f373e00") {
            ImageKind::Original(association) => assert_eq!(association.name, "ff4.ips"),
            other => panic!("unexpected kind: {:?}", other),
        }
        assert_eq!(table.classify("A7654321"), ImageKind::Patched("ff4-patched"));
        assert_eq!(table.classify("00000000"), ImageKind::Unknown);

        let selector = PatchSelector::new(table, Crc32);
        assert_eq!(selector.classify(b"123456789"), ImageKind::Unknown);
    }

    #[test]
    fn selector_uses_configured_patcher() {
        let image = vec![0u8; 2];
        let mut table = AssociationTable::new();
        table.insert(
            Crc32.fingerprint(&image),
            "open.ips",
            b"PATCH\x00\x00\x02\x00\x01\x42".to_vec(),
        );

        let strict = PatchSelector::new(table.clone(), Crc32);
        assert!(matches!(
            strict.apply(&image),
            Err(Error::MissingTerminator { .. })
        ));

        let lenient = PatchSelector::new(table.clone(), Crc32)
            .with_patcher(Patcher::new().terminator(Terminator::Optional));
        assert_eq!(lenient.apply(&image).unwrap(), vec![0, 0, 0x42]);

        let limited = PatchSelector::new(table, Crc32).with_patcher(
            Patcher::new()
                .terminator(Terminator::Optional)
                .max_target_size(2),
        );
        assert!(matches!(
            limited.apply(&image),
            Err(Error::ResourceLimitExceeded { .. })
        ));
    }
}
