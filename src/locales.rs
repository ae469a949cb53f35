//! Locale codes, aliases, and fallback chains.
//!
//! A [`Locale`] is a normalized code: lowercase language, title-cased script,
//! uppercase region. `-` and `_` are both accepted as separators on input;
//! the normalized form always uses `_`.
//!
//! ```text
//! en_us       → en_US
//! de-de       → de_DE
//! zh-hans-cn  → zh_Hans_CN
//! es_419      → es_419
//! ```
//!
//! Aliases are a second name for a locale that only shows up in serving
//! paths (`{locale}` renders the alias) and when importing translations from
//! tools that use other codes. The [`LocaleRegistry`] holds both tables.

use std::collections::BTreeMap;
use std::fmt;

/// Aliases used when importing translations whose codes differ from the
/// pod's own. Extended per pod by `localization.import_as`.
pub const BUILTIN_IMPORT_ALIASES: &[(&str, &str)] = &[
    ("en-GB", "en_GB"),
    ("es-419", "es_419"),
    ("fr-CA", "fr_CA"),
    ("iw", "he_IL"),
    ("no", "nb_NO"),
    ("pt-BR", "pt_BR"),
    ("pt-PT", "pt_PT"),
    ("zh-CN", "zh_Hans_CN"),
    ("zh-HK", "zh_Hant_HK"),
    ("zh-TW", "zh_Hant_TW"),
];

const RTL_LANGUAGES: &[&str] = &["ar", "fa", "he", "ur"];

/// A normalized locale code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Locale(String);

impl Locale {
    pub fn parse(code: &str) -> Self {
        Self(normalize(code))
    }

    pub fn parse_list<S: AsRef<str>>(codes: &[S]) -> Vec<Locale> {
        codes.iter().map(|c| Locale::parse(c.as_ref())).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn language(&self) -> &str {
        self.0.split('_').next().unwrap_or_default()
    }

    /// Region part, if the code has more than a language.
    pub fn region(&self) -> Option<&str> {
        let mut parts = self.0.split('_');
        parts.next();
        parts.last()
    }

    pub fn is_rtl(&self) -> bool {
        RTL_LANGUAGES.contains(&self.language())
    }

    /// Text direction for templates: `rtl` or `ltr`.
    pub fn direction(&self) -> &'static str {
        if self.is_rtl() { "rtl" } else { "ltr" }
    }

    /// BCP-47 style code for `hreflang` attributes (`en_US` → `en-US`).
    pub fn hreflang(&self) -> String {
        self.0.replace('_', "-")
    }

    /// The locale itself, its bare language (when different), then the
    /// default locale (when given and not already present).
    pub fn fallback_chain(&self, default_locale: Option<&Locale>) -> Vec<Locale> {
        let mut chain = vec![self.clone()];
        let language = Locale::parse(self.language());
        if language != *self {
            chain.push(language);
        }
        if let Some(default) = default_locale
            && !chain.contains(default)
        {
            chain.push(default.clone());
        }
        chain
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Locale {
    fn from(code: String) -> Self {
        Locale::parse(&code)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

/// Normalize a locale code (`de-de` → `de_DE`).
pub fn normalize(code: &str) -> String {
    let parts: Vec<&str> = code
        .trim()
        .split(['_', '-'])
        .filter(|p| !p.is_empty())
        .collect();
    let count = parts.len();
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                part.to_lowercase()
            } else if i == count - 1 {
                part.to_uppercase()
            } else {
                title_case(part)
            }
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn title_case(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Locale alias tables for a pod.
#[derive(Debug, Clone, Default)]
pub struct LocaleRegistry {
    /// alias → locale, from `localization.aliases`.
    aliases: BTreeMap<String, Locale>,
    /// external code → locale, for translation imports.
    import_aliases: BTreeMap<String, Locale>,
}

impl LocaleRegistry {
    /// Build from `localization.aliases` (alias → locale) and
    /// `localization.import_as` (external code → locale).
    pub fn new(
        aliases: &BTreeMap<String, String>,
        import_as: &BTreeMap<String, String>,
    ) -> Self {
        let mut import_aliases: BTreeMap<String, Locale> = BUILTIN_IMPORT_ALIASES
            .iter()
            .map(|(external, locale)| (external.to_string(), Locale::parse(locale)))
            .collect();
        for (external, locale) in import_as {
            import_aliases.insert(external.clone(), Locale::parse(locale));
        }
        Self {
            aliases: aliases
                .iter()
                .map(|(alias, locale)| (alias.clone(), Locale::parse(locale)))
                .collect(),
            import_aliases,
        }
    }

    /// The serving alias of a locale, if one is configured.
    pub fn alias_of(&self, locale: &Locale) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, l)| *l == locale)
            .map(|(alias, _)| alias.as_str())
    }

    /// Resolve an alias back to its locale. Comparison is case-insensitive.
    pub fn locale_of_alias(&self, alias: &str) -> Option<&Locale> {
        self.aliases
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(alias))
            .map(|(_, l)| l)
    }

    /// The name that appears in serving paths: the alias, else the code.
    pub fn serving_name(&self, locale: &Locale) -> String {
        self.alias_of(locale)
            .map(str::to_string)
            .unwrap_or_else(|| locale.to_string())
    }

    /// Map an external code used by a translation source onto a pod locale.
    pub fn import_locale(&self, code: &str) -> Locale {
        self.import_aliases
            .get(code)
            .cloned()
            .unwrap_or_else(|| Locale::parse(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(Locale::parse("en_us").as_str(), "en_US");
        assert_eq!(Locale::parse("de-de").as_str(), "de_DE");
        assert_eq!(Locale::parse("zh-hans-cn").as_str(), "zh_Hans_CN");
        assert_eq!(Locale::parse("FR").as_str(), "fr");
        assert_eq!(Locale::parse("es_419").as_str(), "es_419");
    }

    #[test]
    fn equality_is_by_normalized_form() {
        assert_eq!(Locale::parse("en_us"), Locale::parse("EN-US"));
    }

    #[test]
    fn language_and_region() {
        let locale = Locale::parse("pt_BR");
        assert_eq!(locale.language(), "pt");
        assert_eq!(locale.region(), Some("BR"));
        assert_eq!(Locale::parse("de").region(), None);
    }

    #[test]
    fn rtl_detection() {
        assert!(Locale::parse("ar").is_rtl());
        assert!(Locale::parse("he_IL").is_rtl());
        assert_eq!(Locale::parse("fa").direction(), "rtl");
        assert_eq!(Locale::parse("en").direction(), "ltr");
    }

    #[test]
    fn fallback_chain_adds_language_then_default() {
        let default = Locale::parse("en");
        let chain = Locale::parse("de_AT").fallback_chain(Some(&default));
        assert_eq!(chain, Locale::parse_list(&["de_AT", "de", "en"]));

        let chain = Locale::parse("en").fallback_chain(Some(&default));
        assert_eq!(chain, vec![default]);
    }

    #[test]
    fn aliases_resolve_both_ways() {
        let aliases = BTreeMap::from([("en_ALL".to_string(), "en_US".to_string())]);
        let registry = LocaleRegistry::new(&aliases, &BTreeMap::new());
        let locale = Locale::parse("en_US");

        assert_eq!(registry.alias_of(&locale), Some("en_ALL"));
        assert_eq!(registry.locale_of_alias("EN_all"), Some(&locale));
        assert_eq!(registry.serving_name(&locale), "en_ALL");
        assert_eq!(registry.serving_name(&Locale::parse("de")), "de");
    }

    #[test]
    fn import_aliases_include_builtins_and_overrides() {
        let import_as = BTreeMap::from([("en-XA".to_string(), "ar_XB".to_string())]);
        let registry = LocaleRegistry::new(&BTreeMap::new(), &import_as);
        assert_eq!(registry.import_locale("iw").as_str(), "he_IL");
        assert_eq!(registry.import_locale("zh-TW").as_str(), "zh_Hant_TW");
        assert_eq!(registry.import_locale("en-XA").as_str(), "ar_XB");
        assert_eq!(registry.import_locale("de").as_str(), "de");
    }
}
