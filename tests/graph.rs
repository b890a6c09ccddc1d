mod common;

use assert_matches::assert_matches;
use serde_yaml_ng::{Mapping, Value};

use refgenconf::domain::AssetRef;
use refgenconf::error::RefgenError;
use refgenconf::graph::{Relation, RetagOutcome};
use refgenconf::prompt::{Confirm, FixedAnswer};
use refgenconf::registry::Document;

use common::ScriptedAnswers;

const GRAPH: &str = r#"
genome_server: http://refgenomes.databio.org
genome_folder: /data/genomes
config_version: 0.3
genomes:
  hg38:
    assets:
      fasta:
        default_tag: default
        tags:
          default:
            asset_path: fasta
            asset_digest: f1
            seek_keys:
              fasta: hg38.fa
            asset_children: ["bowtie2_index:default", "bwa_index:default"]
      bowtie2_index:
        default_tag: default
        tags:
          default:
            asset_path: bowtie2_index
            asset_digest: b1
            seek_keys:
              bowtie2_index: "."
            asset_parents: ["fasta:default"]
      bwa_index:
        default_tag: default
        tags:
          default:
            asset_path: bwa_index
            seek_keys: {}
            asset_parents: ["fasta:default"]
"#;

fn graph() -> Document {
    Document::parse(GRAPH, None).unwrap()
}

fn data(key: &str, value: &str) -> Mapping {
    let mut mapping = Mapping::new();
    mapping.insert(Value::from(key), Value::from(value));
    mapping
}

#[test]
fn retag_updates_children_parent_lists() {
    let mut doc = graph();
    let outcome = doc
        .retag("hg38", "fasta", "default", "v2", &FixedAnswer(true))
        .unwrap();
    assert_eq!(outcome, RetagOutcome::Retagged);

    let new_ref = AssetRef::new("fasta", "v2");
    let old_ref = AssetRef::new("fasta", "default");
    for child in ["bowtie2_index", "bwa_index"] {
        let parents = &doc.tag("hg38", child, "default").unwrap().asset_parents;
        assert!(parents.contains(&new_ref), "{child} lost its parent");
        assert!(!parents.contains(&old_ref), "{child} kept the old parent");
    }
    assert_matches!(
        doc.tag("hg38", "fasta", "default"),
        Err(RefgenError::MissingTag { .. })
    );
    assert_eq!(doc.asset("hg38", "fasta").unwrap().default_tag.as_deref(), Some("v2"));
}

#[test]
fn retag_updates_parent_child_list() {
    let mut doc = graph();
    doc.retag("hg38", "bowtie2_index", "default", "2.4", &FixedAnswer(true))
        .unwrap();
    let children = &doc.tag("hg38", "fasta", "default").unwrap().asset_children;
    assert_eq!(
        children,
        &vec![
            AssetRef::new("bowtie2_index", "2.4"),
            AssetRef::new("bwa_index", "default"),
        ]
    );
}

#[test]
fn retag_round_trip_restores_document() {
    let original = graph();
    let mut doc = original.clone();
    doc.retag("hg38", "fasta", "default", "tmp", &FixedAnswer(true))
        .unwrap();
    doc.retag("hg38", "fasta", "tmp", "default", &FixedAnswer(true))
        .unwrap();
    assert_eq!(doc, original);
}

#[test]
fn retag_declined_is_a_noop() {
    let mut doc = graph();
    let answers = ScriptedAnswers::new([false]);
    let outcome = doc
        .retag("hg38", "fasta", "default", "v2", &answers)
        .unwrap();
    assert_eq!(outcome, RetagOutcome::Declined);
    assert_eq!(doc, graph());
    assert_eq!(answers.asked().len(), 1);
    assert!(answers.asked()[0].contains("2 children and 0 parents"));
}

#[test]
fn retag_asks_before_overwriting() {
    let mut doc = graph();
    doc.ensure_path("hg38", Some("fasta"), Some("v2"), Some(&data("asset_digest", "other")))
        .unwrap();
    let answers = ScriptedAnswers::new([true, true]);
    doc.retag("hg38", "fasta", "default", "v2", &answers)
        .unwrap();
    assert_eq!(answers.asked().len(), 2);
    assert!(answers.asked()[0].contains("do you wish to override"));
    let moved = doc.tag("hg38", "fasta", "v2").unwrap();
    assert_eq!(moved.asset_digest.as_deref(), Some("f1"));
}

#[test]
fn retag_missing_tag_fails() {
    let mut doc = graph();
    let err = doc
        .retag("hg38", "fasta", "nope", "v2", &FixedAnswer(true))
        .unwrap_err();
    assert_matches!(err, RefgenError::MissingTag { .. });
}

#[test]
fn retag_same_name_is_unchanged() {
    let mut doc = graph();
    let outcome = doc
        .retag("hg38", "fasta", "default", "default", &FixedAnswer(true))
        .unwrap();
    assert_eq!(outcome, RetagOutcome::Unchanged);
    assert_eq!(doc, graph());
}

#[test]
fn retag_skips_vanished_relatives() {
    let mut doc = graph();
    doc.remove_tag("hg38", "bwa_index", Some("default")).unwrap();
    doc.retag("hg38", "fasta", "default", "v2", &FixedAnswer(true))
        .unwrap();
    let parents = &doc.tag("hg38", "bowtie2_index", "default").unwrap().asset_parents;
    assert_eq!(parents, &vec![AssetRef::new("fasta", "v2")]);
}

#[test]
fn removing_last_tag_cascades() {
    let mut doc = graph();
    doc.remove_tag("hg38", "bwa_index", None).unwrap();
    assert_matches!(
        doc.asset("hg38", "bwa_index"),
        Err(RefgenError::MissingAsset { .. })
    );

    doc.remove_tag("hg38", "bowtie2_index", None).unwrap();
    doc.remove_tag("hg38", "fasta", None).unwrap();
    assert_matches!(doc.collection("hg38"), Err(RefgenError::MissingCollection(_)));
    assert!(doc.is_empty());
}

#[test]
fn removing_default_clears_pointer() {
    let mut doc = graph();
    doc.ensure_path("hg38", Some("fasta"), Some("v2"), None).unwrap();
    doc.remove_tag("hg38", "fasta", Some("default")).unwrap();
    let asset = doc.asset("hg38", "fasta").unwrap();
    assert_eq!(asset.default_tag, None);
    assert!(asset.tags.contains_key("v2"));
}

#[test]
fn default_tag_lifecycle() {
    let yaml = "genome_server: http://server\ngenome_folder: /tmp/g\nconfig_version: 0.3\ngenomes: {}\n";
    let mut doc = Document::parse(yaml, None).unwrap();
    doc.ensure_path("hg38", Some("fasta"), Some("default"), Some(&data("asset_digest", "abc")))
        .unwrap();

    let first = doc.get_default_tag("hg38", "fasta", true);
    assert_eq!(first.tag, "default");
    assert!(first.warning.is_some());

    assert!(doc.set_default_tag("hg38", "fasta", "default", false).unwrap());
    let second = doc.get_default_tag("hg38", "fasta", true);
    assert_eq!(second.tag, "default");
    assert_eq!(second.warning, None);
}

#[test]
fn default_tag_falls_back_to_first_tag() {
    let mut doc = graph();
    doc.ensure_path("hg38", Some("star_index"), Some("b"), None).unwrap();
    doc.ensure_path("hg38", Some("star_index"), Some("a"), None).unwrap();
    let fallback = doc.get_default_tag("hg38", "star_index", true);
    assert_eq!(fallback.tag, "a");
    assert!(fallback.warning.is_some());

    let constant = doc.get_default_tag("hg38", "star_index", false);
    assert_eq!(constant.tag, "default");
}

#[test]
fn set_default_respects_existing() {
    let mut doc = graph();
    doc.ensure_path("hg38", Some("fasta"), Some("v2"), None).unwrap();
    assert!(!doc.set_default_tag("hg38", "fasta", "v2", false).unwrap());
    assert_eq!(doc.get_default_tag("hg38", "fasta", true).tag, "default");
    assert!(doc.set_default_tag("hg38", "fasta", "v2", true).unwrap());
    assert_eq!(doc.get_default_tag("hg38", "fasta", true).tag, "v2");

    let err = doc.set_default_tag("hg38", "fasta", "v3", true).unwrap_err();
    assert_matches!(err, RefgenError::MissingTag { .. });
}

#[test]
fn ensure_path_rejects_empty_names() {
    let mut doc = graph();
    let err = doc.ensure_path("", None, None, None).unwrap_err();
    assert_matches!(err, RefgenError::InvalidInsertData(_));
}

#[test]
fn relatives_and_seek_keys_update() {
    let mut doc = graph();
    doc.update_relatives(
        "hg38",
        "star_index",
        "default",
        &[AssetRef::new("fasta", "default"), AssetRef::new("fasta", "default")],
        Relation::Parents,
    )
    .unwrap();
    let entry = doc.tag("hg38", "star_index", "default").unwrap();
    assert_eq!(entry.asset_parents.len(), 1);
    assert!(!doc.is_asset_complete("hg38", "star_index", "default").unwrap());

    let keys = [("star_index".to_string(), ".".to_string())].into_iter().collect();
    doc.update_seek_keys("hg38", "star_index", "default", &keys)
        .unwrap();
    assert!(doc.is_asset_complete("hg38", "star_index", "default").unwrap());
}

#[test]
fn collection_level_queries() {
    let mut doc = graph();
    doc.update_collection("mm10", Some(&data("genome_description", "Mouse")))
        .unwrap();
    assert_eq!(
        doc.collection_attributes("mm10").unwrap().get("genome_description"),
        Some(&Value::from("Mouse"))
    );
    assert!(doc.collection("mm10").unwrap().assets.is_empty());

    doc.ensure_path("mm10", Some("fasta"), Some("default"), None).unwrap();
    assert_eq!(doc.genomes_with_asset("fasta"), vec!["hg38", "mm10"]);
    assert_eq!(doc.genomes_with_asset("bwa_index"), vec!["hg38"]);
    let by_asset = doc.genomes_by_asset();
    assert_eq!(by_asset["fasta"], vec!["hg38", "mm10"]);
    assert_eq!(by_asset["bowtie2_index"], vec!["hg38"]);

    let tagged = doc.assets_dict(Some(&["mm10".to_string()]), true);
    assert_eq!(tagged["mm10"], Vec::<String>::new());
    let untagged = doc.assets_dict(None, false);
    assert_eq!(untagged["hg38"], vec!["bowtie2_index", "bwa_index", "fasta"]);
}

#[test]
fn scripted_answers_fall_back_to_default() {
    let answers = ScriptedAnswers::new([false]);
    assert!(!answers.confirm("first?", true));
    assert!(answers.confirm("second?", true));
    assert_eq!(answers.asked(), vec!["first?", "second?"]);
}
