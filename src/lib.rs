//! # Grow
//!
//! A declarative, file-based static site generator. A *pod* is a directory
//! of YAML/Markdown content, Tera views, gettext catalogs and static files;
//! the build expands every document into one serving path per locale,
//! renders each route, and diffs the result against what a destination
//! already holds so a deploy only touches what changed.
//!
//! # Architecture: Build Pipeline
//!
//! ```text
//! 1. Load     podspec.yaml, blueprints, documents   (Pod, lazily cached)
//! 2. Route    documents + static dirs → Router      (one route per path)
//! 3. Render   Router → Vec<RenderedDocument>        (rayon worker pool)
//! 4. Diff     rendered vs. deployed index → Diff    (SHA-1 per path)
//! 5. Apply    Diff → Destination                    (writes, then deletes)
//! ```
//!
//! Stages run in order; only render and apply are parallel. A render
//! failure on one route does not stop the others: failures are collected
//! and reported together once the batch finishes. A deploy failure stops
//! before the destination's index is replaced, so the next deploy diffs
//! against what was actually there.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`storage`] | Pod file access: local directories and S3-compatible buckets |
//! | [`podspec`] | `podspec.yaml`, environments, deployments, static dirs, sitemap |
//! | [`locales`] | Locale normalization, aliases, RTL, fallback chains |
//! | [`data`] | YAML loading with `!g.*` tags |
//! | [`untag`] | `key@locale` / `key@env.name` resolution |
//! | [`catalogs`] | gettext extract, update, import, compile and lookup |
//! | [`documents`] | Front matter, locale variants, computed fields |
//! | [`collections`] | Blueprints and document listing |
//! | [`path_format`] | `{base}`, `{locale}`, `{date.year}`, ... in path patterns |
//! | [`routes`] | Trie and flat route stores with conflict detection |
//! | [`router`] | Routes for documents, static files, sitemap and error pages |
//! | [`path_filter`] | Ignore/include regexes over serving paths |
//! | [`render`] | Template engine seam, controllers, parallel rendering |
//! | [`cache`] | Content-addressed spill store for large render batches |
//! | [`dependency`] | Source → dependent graph for invalidation |
//! | [`indexes`] | Deploy index, diff and commit metadata |
//! | [`deploy`] | Destinations and the deploy driver |
//! | [`config`] | Process-wide `GROW_*` / RC file configuration |
//! | [`output`] | CLI report formatting |
//!
//! # Design Decisions
//!
//! ## Locales Are Values
//!
//! A [`locales::Locale`] is a normalized code. Fallback chains
//! (`de_AT → de → default`) are computed where they are needed, and
//! per-pod aliases live in a [`locales::LocaleRegistry`] rather than in
//! the type.
//!
//! ## One Shared Pod
//!
//! Render workers share one `Arc<Pod>`. Documents, collections and
//! compiled translations are cached behind `RwLock` maps, and the template
//! engine is cloned per render so no lock is held while a view runs.
//!
//! ## Deploys Are Diffs
//!
//! Every deploy writes `/.grow/index.proto.json` to the destination,
//! mapping each serving path to the SHA-1 of its bytes. The next deploy
//! reads it back, so unchanged files are never re-uploaded and removed
//! routes are deleted. Partial builds (`--locale`, `--file`) never delete.

pub mod cache;
pub mod catalogs;
pub mod collections;
pub mod config;
pub mod data;
pub mod dependency;
pub mod deploy;
pub mod documents;
pub mod indexes;
pub mod locales;
pub mod output;
pub mod path_filter;
pub mod path_format;
pub mod pod;
pub mod podspec;
pub mod render;
pub mod router;
pub mod routes;
pub mod storage;
pub mod untag;

#[cfg(test)]
pub(crate) mod test_helpers;
