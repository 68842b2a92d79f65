//! File-manifest and paired-artifact predicates, plus the label checks that
//! depend on them.
//!
//! A file's tags are the tags of its *associated log entry*: the most recent
//! entry (highest sequence number) whose `filename` equals the file name.
//! Re-uploading a file or re-tagging it appends a newer entry, and that
//! newer entry wins.

use std::collections::BTreeSet;

use grinch_core::error::Result;
use grinch_core::traits::Registry;
use grinch_core::types::LogEntry;

use super::{logs, Outcome};
use crate::checks::PePipeline;
use crate::compiler::TaskParams;

pub const LVEM_TAG: &str = "lvem";
pub const EM_READY: &str = "EM_READY";
pub const PE_READY: &str = "PE_READY";

pub fn is_fits(name: &str) -> bool {
    name.ends_with(".fits") || name.ends_with(".fits.gz")
}

/// `bayestar.fits.gz` → `bayestar`.
pub fn fits_stem(name: &str) -> &str {
    name.strip_suffix(".fits.gz")
        .or_else(|| name.strip_suffix(".fits"))
        .unwrap_or(name)
}

/// The log entry that uploaded `filename` most recently.
///
/// Walks entries newest-first by sequence number and returns the first
/// match, independent of the order the registry returned them in.
pub fn associated_entry<'a>(logs: &'a [LogEntry], filename: &str) -> Option<&'a LogEntry> {
    let mut newest_first: Vec<&LogEntry> = logs.iter().collect();
    newest_first.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
    newest_first
        .into_iter()
        .find(|entry| entry.filename.as_deref() == Some(filename))
}

fn tags_of(logs: &[LogEntry], filename: &str) -> BTreeSet<String> {
    associated_entry(logs, filename)
        .map(|e| e.tag_names.clone())
        .unwrap_or_default()
}

/// A named artifact (or, without a name, any FITS sky map) must be uploaded
/// and carry the expected tags. Clear as soon as one candidate does.
pub async fn artifact(registry: &dyn Registry, event_id: &str, params: &TaskParams) -> Result<Outcome> {
    let files = registry.get_files(event_id).await?;
    let candidates: Vec<&String> = match &params.filename {
        Some(name) => files.iter().filter(|f| *f == name).collect(),
        None => files.iter().filter(|f| is_fits(f)).collect(),
    };
    if candidates.is_empty() {
        let wanted = params.filename.as_deref().unwrap_or("*.fits / *.fits.gz");
        return Ok(Outcome::action_required().note(format!("no artifact matching {wanted}")));
    }

    let logs = registry.get_logs(event_id).await?;
    let mut notes = Vec::new();
    let mut any_consistent = false;
    let mut evidence = Vec::new();

    for name in candidates {
        let entry = associated_entry(&logs, name);
        let tags = entry.map(|e| e.tag_names.clone()).unwrap_or_default();
        let mut problems = Vec::new();

        if let Some(tag) = &params.tag {
            if !tags.contains(tag) {
                problems.push(format!("{name} is missing tag '{tag}'"));
            }
        }
        match params.lvem {
            Some(true) if !tags.contains(LVEM_TAG) => {
                problems.push(format!("{name} is not tagged '{LVEM_TAG}'"));
            }
            Some(false) if tags.contains(LVEM_TAG) => {
                problems.push(format!("{name} is tagged '{LVEM_TAG}' but should not be"));
            }
            _ => {}
        }

        evidence.extend(entry.cloned());
        any_consistent |= problems.is_empty();
        notes.extend(problems);
    }

    if !any_consistent {
        let mut outcome = Outcome::action_required().evidence(evidence);
        for note in notes {
            outcome = outcome.note(note);
        }
        Ok(outcome)
    } else {
        Ok(Outcome::clear().evidence(evidence))
    }
}

/// Every FITS sky map must have a derived `<stem>.<extension>` artifact
/// whose tags equal the sky map's tags exactly.
pub async fn paired(registry: &dyn Registry, event_id: &str, extension: &str) -> Result<Outcome> {
    let files = registry.get_files(event_id).await?;
    let fits: Vec<&String> = files.iter().filter(|f| is_fits(f)).collect();
    if fits.is_empty() {
        return Ok(Outcome::clear().note("no FITS files to pair"));
    }

    let logs = registry.get_logs(event_id).await?;
    let mut notes = Vec::new();
    let mut evidence = Vec::new();

    for source in fits {
        let derived = format!("{}.{extension}", fits_stem(source));
        evidence.extend(associated_entry(&logs, source).cloned());

        if !files.contains(&derived) {
            notes.push(format!("no {extension} file found for {source} <-> {derived}"));
            continue;
        }
        evidence.extend(associated_entry(&logs, &derived).cloned());

        let source_tags = tags_of(&logs, source);
        let derived_tags = tags_of(&logs, &derived);
        if source_tags != derived_tags {
            notes.push(format!(
                "tags differ: {source} {:?} vs {derived} {:?}",
                source_tags, derived_tags
            ));
        }
    }

    let mut outcome = Outcome::from_missing(!notes.is_empty()).evidence(evidence);
    for note in notes {
        outcome = outcome.note(note);
    }
    Ok(outcome)
}

/// `EM_READY` and "a sky map was uploaded" must agree.
pub async fn emready_label(registry: &dyn Registry, event_id: &str) -> Result<Outcome> {
    let files = registry.get_files(event_id).await?;
    let fits: Vec<&String> = files.iter().filter(|f| is_fits(f)).collect();
    let labels = registry.get_labels(event_id).await?;
    let emready = labels.contains(EM_READY);

    let outcome = match (emready, fits.is_empty()) {
        (true, false) => Outcome::clear(),
        (true, true) => Outcome::action_required()
            .note(format!("event labeled {EM_READY} but no FITS files were found")),
        (false, false) => Outcome::action_required().note(format!(
            "{} FITS file(s) found but event not labeled {EM_READY}",
            fits.len()
        )),
        (false, true) => Outcome::clear().note(format!("no FITS files and no {EM_READY} label")),
    };
    Ok(outcome)
}

/// `PE_READY` and "some parameter estimation finished" must agree.
pub async fn peready_label(
    registry: &dyn Registry,
    event_id: &str,
    pipelines: &[PePipeline],
) -> Result<Outcome> {
    let entries = registry.get_logs(event_id).await?;
    let mut finished = Vec::new();
    let mut evidence = Vec::new();
    for pipeline in pipelines {
        let Some(marker) = logs::marker_for(pipeline.finish_predicate()) else {
            continue;
        };
        let found = logs::matching(&entries, marker);
        if !found.is_empty() {
            finished.push(pipeline.as_str());
            evidence.extend(found);
        }
    }

    let labels = registry.get_labels(event_id).await?;
    let peready = labels.contains(PE_READY);

    let outcome = match (peready, finished.is_empty()) {
        (true, false) => Outcome::clear(),
        (true, true) => Outcome::action_required()
            .note(format!("event labeled {PE_READY} but no PE jobs reporting")),
        (false, false) => Outcome::action_required().note(format!(
            "PE finished ({}) but event not labeled {PE_READY}",
            finished.join(", ")
        )),
        (false, true) => Outcome::clear(),
    };
    Ok(outcome.evidence(evidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::Verdict;
    use crate::registry::MemoryRegistry;
    use grinch_core::types::EventRecord;

    fn registry() -> MemoryRegistry {
        let reg = MemoryRegistry::new();
        reg.insert_event(EventRecord {
            id: "G1".into(),
            group: "CBC".into(),
            pipeline: "gstlal".into(),
            search: None,
            far: Some(1e-9),
            event_time: 1_000_000_000.0,
            creation_time: "2015-09-14 09:50:45 UTC".into(),
            central_frequency: None,
        });
        reg
    }

    #[test]
    fn test_fits_names() {
        assert!(is_fits("bayestar.fits.gz"));
        assert!(is_fits("skymap.fits"));
        assert!(!is_fits("skymap.png"));
        assert_eq!(fits_stem("bayestar.fits.gz"), "bayestar");
        assert_eq!(fits_stem("LIB.skymap.fits"), "LIB.skymap");
    }

    #[test]
    fn test_associated_entry_is_newest() {
        let entry = |n: u64, tags: &[&str]| LogEntry {
            sequence_number: n,
            comment: format!("upload {n}"),
            tag_names: tags.iter().map(|t| t.to_string()).collect(),
            filename: Some("skymap.fits".into()),
            timestamp: String::new(),
        };
        let logs = vec![entry(9, &["lvem"]), entry(3, &[]), entry(5, &["sky_loc"])];
        assert_eq!(associated_entry(&logs, "skymap.fits").unwrap().sequence_number, 9);
        assert!(associated_entry(&logs, "other.fits").is_none());
    }

    #[tokio::test]
    async fn test_paired_tags_must_match() {
        let reg = registry();
        reg.append_log("G1", "skymap", &["lvem"], Some("skymap.fits"));
        reg.append_log("G1", "skymap plot", &["lvem"], Some("skymap.png"));
        let out = paired(&reg, "G1", "png").await.unwrap();
        assert_eq!(out.verdict, Verdict::Clear);
        assert_eq!(out.evidence.len(), 2);

        reg.append_log("G1", "skymap plot (retagged)", &[], Some("skymap.png"));
        let out = paired(&reg, "G1", "png").await.unwrap();
        assert!(out.is_action_required());
        assert!(out.notes[0].starts_with("tags differ"));
    }

    #[tokio::test]
    async fn test_paired_missing_derived() {
        let reg = registry();
        reg.append_log("G1", "skymap", &["sky_loc"], Some("bayestar.fits.gz"));
        reg.append_log("G1", "skymap json", &["sky_loc"], Some("bayestar.json"));
        assert_eq!(paired(&reg, "G1", "json").await.unwrap().verdict, Verdict::Clear);

        let out = paired(&reg, "G1", "png").await.unwrap();
        assert!(out.is_action_required());
        assert!(out.notes[0].contains("bayestar.png"));
    }

    #[tokio::test]
    async fn test_paired_without_fits_is_clear() {
        let reg = registry();
        reg.append_log("G1", "psd", &["psd"], Some("psd.xml.gz"));
        assert_eq!(paired(&reg, "G1", "png").await.unwrap().verdict, Verdict::Clear);
    }

    #[tokio::test]
    async fn test_artifact_visibility() {
        let reg = registry();
        let params = TaskParams {
            filename: Some("bayestar.fits.gz".into()),
            lvem: Some(true),
            ..TaskParams::default()
        };
        let out = artifact(&reg, "G1", &params).await.unwrap();
        assert!(out.is_action_required());
        assert_eq!(out.notes, vec!["no artifact matching bayestar.fits.gz"]);

        reg.append_log("G1", "skymap", &["sky_loc"], Some("bayestar.fits.gz"));
        assert!(artifact(&reg, "G1", &params).await.unwrap().is_action_required());

        reg.append_log("G1", "skymap", &["sky_loc", "lvem"], Some("bayestar.fits.gz"));
        assert_eq!(artifact(&reg, "G1", &params).await.unwrap().verdict, Verdict::Clear);

        let private = TaskParams {
            lvem: Some(false),
            ..params
        };
        assert!(artifact(&reg, "G1", &private).await.unwrap().is_action_required());
    }

    #[tokio::test]
    async fn test_artifact_by_suffix_and_tag() {
        let reg = registry();
        let params = TaskParams {
            tag: Some("sky_loc".into()),
            ..TaskParams::default()
        };
        reg.append_log("G1", "untagged", &[], Some("cwb.fits.gz"));
        assert!(artifact(&reg, "G1", &params).await.unwrap().is_action_required());

        reg.append_log("G1", "tagged", &["sky_loc"], Some("LIB.fits.gz"));
        assert_eq!(artifact(&reg, "G1", &params).await.unwrap().verdict, Verdict::Clear);
    }

    #[tokio::test]
    async fn test_emready_label() {
        let reg = registry();
        assert_eq!(emready_label(&reg, "G1").await.unwrap().verdict, Verdict::Clear);

        reg.add_label("G1", EM_READY);
        assert!(emready_label(&reg, "G1").await.unwrap().is_action_required());

        reg.append_log("G1", "skymap", &["sky_loc"], Some("bayestar.fits.gz"));
        assert_eq!(emready_label(&reg, "G1").await.unwrap().verdict, Verdict::Clear);
    }

    #[tokio::test]
    async fn test_peready_label() {
        let reg = registry();
        let all = [PePipeline::Lib, PePipeline::Bayeswave, PePipeline::Lalinference];

        reg.append_log("G1", "BWB Follow-up results", &["pe"], None);
        let out = peready_label(&reg, "G1", &all).await.unwrap();
        assert!(out.is_action_required());
        assert!(out.notes[0].contains("bayeswave"));

        reg.add_label("G1", PE_READY);
        let out = peready_label(&reg, "G1", &all).await.unwrap();
        assert_eq!(out.verdict, Verdict::Clear);

        let out = peready_label(&reg, "G1", &[PePipeline::Lib]).await.unwrap();
        assert!(out.is_action_required());
    }
}
