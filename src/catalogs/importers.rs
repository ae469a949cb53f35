//! Importing translations from outside the pod.
//!
//! | Source | Locale |
//! |--------|--------|
//! | `x.po` | required argument |
//! | directory with `podspec.yaml` | `translations/<locale>/LC_MESSAGES/messages.po` |
//! | other directory | `<locale>/*.po` |
//! | `x.zip` | either directory layout, read in place |
//! | `x.csv` | header row: default locale column, then one column per locale |
//!
//! External locale codes go through the registry's import aliases
//! (`pt-BR` → `pt_BR`, plus `localization.import_as`).
//!
//! Merge rules for each imported message:
//! - absent from the pod catalog: added when `include_obsolete`, else skipped
//! - empty or unchanged imported translation: ignored
//! - otherwise written, except that `untranslated` only fills empty targets

use super::catalog::{Catalog, Message};
use super::{CatalogError, Catalogs, po};
use crate::locales::Locale;
use std::fs;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub include_obsolete: bool,
    /// Only fill messages that have no translation yet.
    pub untranslated: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            include_obsolete: true,
            untranslated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportSummary {
    pub changed: bool,
    pub imported: usize,
    pub total: usize,
}

impl ImportSummary {
    fn absorb(&mut self, other: ImportSummary) {
        self.changed |= other.changed;
        self.imported += other.imported;
        self.total += other.total;
    }
}

impl Catalogs<'_> {
    /// Import from a file or directory on the local filesystem.
    pub fn import_translations(
        &self,
        source: &Path,
        locale: Option<&str>,
        options: ImportOptions,
    ) -> Result<ImportSummary, CatalogError> {
        let name = source.to_string_lossy();
        if source.is_dir() {
            return self.import_dir(source, options);
        }
        if !source.is_file() {
            return Err(CatalogError::Import(format!("Not found: {}", name)));
        }
        match source.extension().and_then(|e| e.to_str()) {
            Some("zip") => self.import_zip(source, options),
            Some("po") => {
                let locale = locale.ok_or_else(|| CatalogError::Import("Must specify locale.".to_string()))?;
                self.import_content(locale, &fs::read_to_string(source)?, options)
            }
            Some("csv") => self.import_csv(&fs::read(source)?, options),
            _ => Err(CatalogError::Import(
                "Must import a .zip, .csv, .po file, or directory.".to_string(),
            )),
        }
    }

    fn import_dir(&self, dir: &Path, options: ImportOptions) -> Result<ImportSummary, CatalogError> {
        let mut summary = ImportSummary::default();
        if dir.join("podspec.yaml").exists() {
            log::info!("Importing from pod -> {}", dir.join("podspec.yaml").display());
            let translations = dir.join("translations");
            for entry in sorted_entries(&translations)? {
                let po_path = entry.join("LC_MESSAGES").join("messages.po");
                if po_path.is_file() {
                    let locale = file_name(&entry);
                    summary.absorb(self.import_content(&locale, &fs::read_to_string(&po_path)?, options)?);
                }
            }
            return Ok(summary);
        }

        for locale_dir in sorted_entries(dir)? {
            let locale = file_name(&locale_dir);
            if locale.starts_with('.') || !locale_dir.is_dir() {
                continue;
            }
            for file in sorted_entries(&locale_dir)? {
                if file.extension().is_some_and(|e| e == "po") {
                    summary.absorb(self.import_content(&locale, &fs::read_to_string(&file)?, options)?);
                } else {
                    log::warn!("Skipping: {}", file.display());
                }
            }
        }
        Ok(summary)
    }

    /// Zip archives are read in place: the locale is the directory above
    /// `LC_MESSAGES`, or else the first path component.
    fn import_zip(&self, path: &Path, options: ImportOptions) -> Result<ImportSummary, CatalogError> {
        let mut archive = zip::ZipArchive::new(fs::File::open(path)?)?;
        let mut summary = ImportSummary::default();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let name = file.name().to_string();
            if !name.ends_with(".po") {
                continue;
            }
            let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
            let locale = match parts.iter().position(|p| *p == "LC_MESSAGES") {
                Some(i) if i > 0 => parts[i - 1],
                _ if parts.len() > 1 => parts[parts.len() - 2],
                _ => continue,
            };
            if locale.starts_with('.') {
                continue;
            }
            let locale = locale.to_string();
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            summary.absorb(self.import_content(&locale, &content, options)?);
        }
        Ok(summary)
    }

    /// One catalog per non-default column; the default locale column holds
    /// the msgids.
    fn import_csv(&self, bytes: &[u8], options: ImportOptions) -> Result<ImportSummary, CatalogError> {
        let default_locale = self
            .pod
            .podspec()
            .get("localization.default_locale")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
            .to_string();
        let mut reader = csv::Reader::from_reader(bytes);
        let headers = reader.headers()?.clone();
        let Some(source_column) = headers.iter().position(|h| h == default_locale) else {
            return Err(CatalogError::Import(format!(
                "Locale {} not found in CSV header",
                default_locale
            )));
        };

        let mut by_locale: Vec<(String, Catalog)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != source_column)
            .map(|(_, h)| (h.to_string(), Catalog::new(Some(Locale::parse(h)))))
            .collect();
        for record in reader.records() {
            let record = record?;
            let msgid = record.get(source_column).unwrap_or_default();
            let translations = record.iter().enumerate().filter(|(i, _)| *i != source_column);
            for ((_, translation), (_, catalog)) in translations.zip(by_locale.iter_mut()) {
                catalog.insert(Message::new(msgid, translation));
            }
        }

        let mut summary = ImportSummary::default();
        for (locale, catalog) in by_locale {
            let content = po::write(&catalog, po::WriteOptions::default());
            summary.absorb(self.import_content(&locale, &content, options)?);
        }
        Ok(summary)
    }

    /// Merge `.po` text for an external locale code into the pod.
    pub fn import_content(
        &self,
        locale: &str,
        content: &str,
        options: ImportOptions,
    ) -> Result<ImportSummary, CatalogError> {
        let pod_locale = self.pod.registry().import_locale(locale);
        let path = self.catalog_path(&pod_locale);
        let incoming = po::parse(content, Some(pod_locale.clone())).map_err(|source| CatalogError::Parse {
            path: format!("{} (import)", locale),
            source,
        })?;

        if !self.exists(&pod_locale) {
            if !options.include_obsolete {
                return Ok(ImportSummary::default());
            }
            self.pod.storage().write(&path, content.as_bytes())?;
            log::info!("Imported: {} ({} messages)", path, incoming.len());
            return Ok(ImportSummary {
                changed: true,
                imported: incoming.len(),
                total: incoming.len(),
            });
        }

        let mut existing = self.get(&pod_locale)?;
        let imported = merge_imported(&mut existing, &incoming, options);
        if imported == 0 {
            return Ok(ImportSummary {
                changed: false,
                imported: 0,
                total: 0,
            });
        }
        self.save(&mut existing, &path, true)?;
        log::info!("Imported: {} ({}/{})", path, imported, incoming.len());
        Ok(ImportSummary {
            changed: true,
            imported,
            total: incoming.len(),
        })
    }
}

/// Apply the merge rules; returns how many messages changed.
pub fn merge_imported(existing: &mut Catalog, incoming: &Catalog, options: ImportOptions) -> usize {
    let mut imported = 0;
    for message in incoming.messages() {
        match existing.get_mut(&message.id, message.context.as_deref()) {
            None => {
                if options.include_obsolete {
                    existing.insert(message.clone());
                    imported += 1;
                }
            }
            Some(current) => {
                if !message.is_translated() || current.strings == message.strings {
                    continue;
                }
                if options.untranslated && current.is_translated() {
                    continue;
                }
                current.strings = message.strings.clone();
                current.flags.remove("fuzzy");
                imported += 1;
            }
        }
    }
    imported
}

fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>, CatalogError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::PodBuilder;
    use std::io::Write;
    use tempfile::TempDir;

    const EXISTING: &str = "msgid \"A\"\nmsgstr \"Ae\"\n";

    fn pod() -> crate::test_helpers::TestPod {
        PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  default_locale: en\n  locales: [de, pt_BR]\n")
            .file("/translations/de/LC_MESSAGES/messages.po", EXISTING)
            .open()
    }

    fn de_catalog(pod: &crate::pod::Pod) -> Catalog {
        pod.catalogs().get(&Locale::parse("de")).unwrap()
    }

    #[test]
    fn empty_import_preserves_and_new_ids_added() {
        let pod = pod();
        let incoming = "msgid \"A\"\nmsgstr \"\"\n\nmsgid \"B\"\nmsgstr \"Be\"\n";
        let summary = pod
            .catalogs()
            .import_content("de", incoming, ImportOptions::default())
            .unwrap();
        assert!(summary.changed);
        assert_eq!(summary.imported, 1);

        let de = de_catalog(&pod);
        assert_eq!(de.get("A", None).unwrap().string(), "Ae");
        assert_eq!(de.get("B", None).unwrap().string(), "Be");
    }

    #[test]
    fn untranslated_only_fills_gaps() {
        let mut existing = po::parse("msgid \"A\"\nmsgstr \"Ae\"\n\nmsgid \"C\"\nmsgstr \"\"\n", None).unwrap();
        let incoming = po::parse("msgid \"A\"\nmsgstr \"New\"\n\nmsgid \"C\"\nmsgstr \"Ce\"\n", None).unwrap();
        let options = ImportOptions {
            include_obsolete: true,
            untranslated: true,
        };
        assert_eq!(merge_imported(&mut existing, &incoming, options), 1);
        assert_eq!(existing.get("A", None).unwrap().string(), "Ae");
        assert_eq!(existing.get("C", None).unwrap().string(), "Ce");
    }

    #[test]
    fn obsolete_excluded_on_request() {
        let mut existing = po::parse(EXISTING, None).unwrap();
        let incoming = po::parse("msgid \"B\"\nmsgstr \"Be\"\n", None).unwrap();
        let options = ImportOptions {
            include_obsolete: false,
            untranslated: false,
        };
        assert_eq!(merge_imported(&mut existing, &incoming, options), 0);
        assert!(!existing.contains("B", None));
    }

    #[test]
    fn new_locale_catalog_written_through_alias() {
        let pod = pod();
        pod.catalogs()
            .import_content("pt-BR", "msgid \"A\"\nmsgstr \"Á\"\n", ImportOptions::default())
            .unwrap();
        assert!(pod.storage().exists("/translations/pt_BR/LC_MESSAGES/messages.po"));
    }

    #[test]
    fn imports_locale_directories_and_csv() {
        let pod = pod();
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("de")).unwrap();
        fs::write(tmp.path().join("de/messages.po"), "msgid \"B\"\nmsgstr \"Be\"\n").unwrap();
        fs::write(tmp.path().join("de/readme.txt"), "skip").unwrap();
        pod.catalogs()
            .import_translations(tmp.path(), None, ImportOptions::default())
            .unwrap();
        assert_eq!(de_catalog(&pod).get("B", None).unwrap().string(), "Be");

        let csv_path = tmp.path().join("strings.csv");
        fs::write(&csv_path, "en,de\nC,Ce\nA,\n").unwrap();
        pod.catalogs()
            .import_translations(&csv_path, None, ImportOptions::default())
            .unwrap();
        let de = de_catalog(&pod);
        assert_eq!(de.get("C", None).unwrap().string(), "Ce");
        assert_eq!(de.get("A", None).unwrap().string(), "Ae");
    }

    #[test]
    fn imports_zip_archives() {
        let pod = pod();
        let tmp = TempDir::new().unwrap();
        let zip_path = tmp.path().join("translations.zip");
        {
            let mut writer = zip::ZipWriter::new(fs::File::create(&zip_path).unwrap());
            writer
                .start_file("de/LC_MESSAGES/messages.po", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"msgid \"Z\"\nmsgstr \"Zet\"\n").unwrap();
            writer.finish().unwrap();
        }
        pod.catalogs()
            .import_translations(&zip_path, None, ImportOptions::default())
            .unwrap();
        assert_eq!(de_catalog(&pod).get("Z", None).unwrap().string(), "Zet");
    }

    #[test]
    fn po_requires_locale_and_known_extension() {
        let pod = pod();
        let tmp = TempDir::new().unwrap();
        let po_path = tmp.path().join("x.po");
        fs::write(&po_path, EXISTING).unwrap();
        assert!(pod.catalogs().import_translations(&po_path, None, ImportOptions::default()).is_err());
        let txt = tmp.path().join("x.txt");
        fs::write(&txt, "").unwrap();
        assert!(matches!(
            pod.catalogs().import_translations(&txt, None, ImportOptions::default()),
            Err(CatalogError::Import(_))
        ));
    }
}
