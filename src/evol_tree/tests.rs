use std::fs;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rstest::*;
use tempfile::tempdir;

use crate::errors::EvolError;
use crate::evol_model::{EvolModel, EvolParam};
use crate::evol_tree::model_registry::next_name;
use crate::evol_tree::{EvolTree, ModelRegistry, RunOptions, TreeId};
use crate::tree;

const CODEML_DATA: &str = "./data/codeml";

fn apes() -> EvolTree {
    EvolTree::from_newick_file(Path::new("./data/apes.newick"))
        .unwrap()
        .with_workdir(CODEML_DATA)
}

fn out_of(model: &str) -> PathBuf {
    Path::new(CODEML_DATA).join(model).join("out")
}

fn evol_error(error: &anyhow::Error) -> &EvolError {
    error.downcast_ref::<EvolError>().unwrap()
}

#[test]
fn new_tree_is_sorted_and_labelled() {
    let evol_tree = apes();
    assert!(evol_tree.tree.is_paml_labelled());
    assert_eq!(
        evol_tree.to_paml_newick(false),
        "(Gorilla,(Homo,Pan),(Hylobates,Pongo));"
    );
    let expected = [
        ("Gorilla", 1),
        ("Homo", 2),
        ("Hylobates", 3),
        ("Pan", 4),
        ("Pongo", 5),
    ];
    for (name, paml_id) in expected {
        assert_eq!(evol_tree.tree.by_id(name).paml_id, Some(paml_id));
    }
    let root = evol_tree.tree.root;
    assert_eq!(evol_tree.tree.node(&root).paml_id, Some(6));
    let homo = evol_tree.tree.try_idx("Homo").unwrap();
    let homo_pan = *evol_tree.tree.parent(&homo).unwrap();
    assert_eq!(evol_tree.tree.node(&homo_pan).paml_id, Some(7));
}

#[test]
fn new_tree_clears_marks() {
    let evol_tree = EvolTree::new(tree!("((A #1,B),C #2);"));
    assert!(evol_tree.tree.marked().is_empty());
    assert_eq!(evol_tree.to_paml_newick(true), "((A,B),C);");
}

#[test]
fn trees_get_distinct_ids() {
    let first = EvolTree::new(tree!("(A,B);"));
    let second = EvolTree::new(tree!("(A,B);"));
    assert_ne!(first.id(), second.id());
    assert_eq!(first.new_model("M0").unwrap().tree_id(), first.id());
}

#[rstest]
#[case::plain("M0", "M0__1")]
#[case::suffixed("M0__1", "M0__2")]
#[case::dotted("b_free.clade__9", "b_free.clade__10")]
#[case::not_a_number("M0__x", "M0__x__1")]
fn next_model_names(#[case] name: &str, #[case] expected: &str) {
    assert_eq!(next_name(name), expected);
}

#[test]
fn registry_never_overwrites() {
    let tree_id = TreeId::next();
    let mut registry = ModelRegistry::new();
    for _ in 0..3 {
        registry.insert_unique(EvolModel::new("M0", tree_id).unwrap());
    }
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.names(), ["M0", "M0__1", "M0__2"]);
    assert_eq!(registry.get("M0__2").unwrap().name, "M0__2");
    assert_eq!(registry.unique_name("M0"), "M0__3");
    assert_eq!(registry.unique_name("M1"), "M1");
}

#[test]
fn linking_same_name_twice() {
    let mut evol_tree = apes();
    let first = evol_tree.link_to_evol_model_by_name(&out_of("M0"), "M0").unwrap();
    let second = evol_tree.link_to_evol_model_by_name(&out_of("M0"), "M0").unwrap();
    assert_eq!(first, "M0");
    assert_eq!(second, "M0__1");
    assert_eq!(evol_tree.models().names(), ["M0", "M0__1"]);
    assert!(evol_tree.get_evol_model("M0").unwrap().is_fitted());
    assert!(evol_tree.get_evol_model("M0__1").unwrap().is_fitted());
}

#[test]
fn missing_output_keeps_model_registered() {
    let mut evol_tree = apes();
    let mut model = evol_tree.new_model("M7").unwrap();
    model.run = Some(String::from("codeml crashed"));
    let res = evol_tree.link_to_evol_model(&out_of("M7"), model);
    let error = res.unwrap_err();
    assert_matches!(
        evol_error(&error),
        EvolError::MissingOutput { model, path } if model == "M7" && path == &out_of("M7")
    );
    let model = evol_tree.get_evol_model("M7").unwrap();
    assert!(!model.is_fitted());
    assert_eq!(model.run.as_deref(), Some("codeml crashed"));
}

#[test]
fn missing_output_does_not_rewrite_branch_lengths() {
    let mut evol_tree = apes();
    let homo = evol_tree.tree.try_idx("Homo").unwrap();
    assert!(evol_tree
        .link_to_evol_model_by_name(&out_of("M7"), "M7")
        .is_err());
    assert_eq!(evol_tree.tree.blen(&homo), 0.006);
}

#[test]
fn unknown_model_name_is_not_registered() {
    let mut evol_tree = apes();
    assert!(evol_tree
        .link_to_evol_model_by_name(&out_of("M0"), "M13")
        .is_err());
    assert!(evol_tree.models().is_empty());
}

#[test]
fn first_model_sets_branch_lengths() {
    let mut evol_tree = apes();
    let homo = evol_tree.tree.try_idx("Homo").unwrap();
    let homo_pan = *evol_tree.tree.parent(&homo).unwrap();
    let root = evol_tree.tree.root;
    let root_blen = evol_tree.tree.blen(&root);

    evol_tree.link_to_evol_model_by_name(&out_of("fb"), "fb").unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), 0.005012);
    assert_eq!(evol_tree.tree.blen(&homo_pan), 0.014257);
    assert_eq!(evol_tree.tree.blen(&root), root_blen);

    evol_tree.link_to_evol_model_by_name(&out_of("M0"), "M0").unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), 0.005012);
    assert_eq!(evol_tree.tree.blen(&homo_pan), 0.014257);
}

#[test]
fn branch_lengths_from_other_model() {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("fb"), "fb").unwrap();
    evol_tree.link_to_evol_model_by_name(&out_of("M0"), "M0").unwrap();
    let homo = evol_tree.tree.try_idx("Homo").unwrap();

    evol_tree.change_dist_to_evol(EvolParam::BranchLength, "M0").unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), 0.006003);
    evol_tree.change_dist_to_evol(EvolParam::Omega, "fb").unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), 0.1001);
    evol_tree.change_dist_to_evol(EvolParam::Dn, "fb").unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), 0.0007);

    let res = evol_tree.change_dist_to_evol(EvolParam::Ds, "M3");
    assert!(res.is_err());
}

#[test]
fn site_model_loads_site_results() {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    let m2 = evol_tree.get_evol_model("M2").unwrap();
    let sites = m2.sites.as_ref().unwrap();
    assert_eq!(sites.neb.len(), 3);
    assert_eq!(sites.beb.len(), 3);

    // a renamed run has no rst of its own
    evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    assert!(evol_tree.get_evol_model("M2__1").unwrap().sites.is_none());
}

#[test]
fn unreadable_rst_keeps_model_and_branch_lengths() {
    let workdir = tempdir().unwrap();
    fs::create_dir_all(workdir.path().join("M2")).unwrap();
    fs::write(workdir.path().join("M2").join("rst"), [0xff, 0xfe, 0x00, 0x9f]).unwrap();
    let mut evol_tree = apes().with_workdir(workdir.path());
    let homo = evol_tree.tree.try_idx("Homo").unwrap();
    let homo_paml_id = evol_tree.tree.node(&homo).paml_id.unwrap();

    let name = evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    assert_eq!(name, "M2");
    let m2 = evol_tree.get_evol_model("M2").unwrap();
    assert!(m2.is_fitted());
    assert!(m2.sites.is_none());
    let m2_blen = m2
        .branch_value(homo_paml_id, EvolParam::BranchLength)
        .unwrap();
    assert_eq!(evol_tree.tree.blen(&homo), m2_blen);
}

#[test]
fn branch_model_has_no_site_results() {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("fb"), "fb").unwrap();
    assert!(evol_tree.get_evol_model("fb").unwrap().sites.is_none());
}

#[test]
fn foreign_model_is_rebound() {
    let mut evol_tree = apes();
    let other = EvolTree::new(tree!("(A,B);"));
    let model = other.new_model("M1").unwrap();
    evol_tree.link_to_evol_model(&out_of("M1"), model).unwrap();
    let linked = evol_tree.get_evol_model("M1").unwrap();
    assert_eq!(linked.tree_id(), evol_tree.id());
}

#[test]
fn likelihood_ratio_test_of_site_models() {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("M1"), "M1").unwrap();
    evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    let pvalue = evol_tree.get_most_likely("M2", "M1").unwrap();
    assert_relative_eq!(pvalue, 0.006737947, epsilon = 1e-8);
}

#[test]
fn likelihood_ratio_test_of_misordered_models() {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("M1"), "M1").unwrap();
    evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    assert_eq!(evol_tree.get_most_likely("M1", "M2").unwrap(), 1.0);
}

#[test]
fn likelihood_ratio_test_of_unfitted_models() {
    let mut evol_tree = apes();
    assert!(evol_tree
        .link_to_evol_model_by_name(&out_of("M7"), "M7")
        .is_err());
    assert!(evol_tree
        .link_to_evol_model_by_name(&out_of("M8"), "M8")
        .is_err());
    assert_eq!(evol_tree.get_most_likely("M8", "M7").unwrap(), 1.0);

    evol_tree.link_to_evol_model_by_name(&out_of("M1"), "M1").unwrap();
    assert_eq!(evol_tree.get_most_likely("M8", "M1").unwrap(), 1.0);
}

#[rstest]
#[case::alternative_missing("M3", "M1", &["M3"])]
#[case::null_missing("M2", "M3", &["M3"])]
#[case::both_missing("M8", "M7", &["M8", "M7"])]
#[case::same_missing("M8", "M8", &["M8"])]
fn likelihood_ratio_test_of_missing_models(
    #[case] alternative: &str,
    #[case] null: &str,
    #[case] missing: &[&str],
) {
    let mut evol_tree = apes();
    evol_tree.link_to_evol_model_by_name(&out_of("M1"), "M1").unwrap();
    evol_tree.link_to_evol_model_by_name(&out_of("M2"), "M2").unwrap();
    let error = evol_tree.get_most_likely(alternative, null).unwrap_err();
    assert_matches!(evol_error(&error), EvolError::ModelNotFound(names) if names == missing);
    assert!(error.to_string().starts_with("Model(s) not computed"));
}

#[test]
fn get_missing_model() {
    let evol_tree = apes();
    let error = evol_tree.get_evol_model("M0").unwrap_err();
    assert_eq!(
        evol_error(&error),
        &EvolError::ModelNotFound(vec![String::from("M0")])
    );
}

#[test]
fn marks_in_written_tree() {
    let mut evol_tree = apes();
    evol_tree.mark_by_paml_ids(&[7, 3], None).unwrap();
    assert_eq!(
        evol_tree.to_paml_newick(true),
        "(Gorilla,(Homo,Pan) #1,(Hylobates #1,Pongo));"
    );
    evol_tree
        .mark_by_paml_ids(&[1], Some(&[String::from("#2")]))
        .unwrap();
    assert_eq!(
        evol_tree.to_paml_newick(true),
        "(Gorilla #2,(Homo,Pan),(Hylobates,Pongo));"
    );

    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("tree");
    evol_tree.write(&path, true).unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "(Gorilla #2,(Homo,Pan),(Hylobates,Pongo));\n"
    );
}

#[test]
fn linking_alignment() {
    let mut evol_tree = apes();
    assert!(evol_tree.sequences().is_none());
    evol_tree
        .link_to_alignment(Path::new("./data/apes.fasta"))
        .unwrap();
    let names: Vec<&str> = evol_tree
        .sequences()
        .unwrap()
        .iter()
        .map(|rec| rec.id())
        .collect();
    assert_eq!(names, ["Gorilla", "Homo", "Hylobates", "Pan", "Pongo"]);
    assert!(evol_tree.tree.is_paml_labelled());
}

#[rstest]
#[case::missing_leaf("./data/apes_missing_leaf.fasta", "No sequence found for leaves: Hylobates, Pongo")]
#[case::garbage("./data/apes_garbage.fasta", "Invalid nucleotide sequence")]
#[case::no_file("./data/nowhere.fasta", "")]
fn linking_bad_alignment(#[case] path: &str, #[case] message: &str) {
    let mut evol_tree = apes();
    let res = evol_tree.link_to_alignment(Path::new(path));
    assert!(res.is_err());
    assert!(res.unwrap_err().to_string().contains(message));
    assert!(evol_tree.sequences().is_none());
}

#[test]
fn running_without_alignment() {
    let mut evol_tree = apes();
    let res = evol_tree.run_model("M0", &RunOptions::default());
    assert!(res.is_err());
    assert!(res.unwrap_err().to_string().contains("not linked to an alignment"));
}

#[test]
fn running_missing_codeml() {
    let temp_dir = tempdir().unwrap();
    let mut evol_tree = apes()
        .with_workdir(temp_dir.path())
        .with_codeml("/nonexistent/bin/codeml");
    evol_tree
        .link_to_alignment(Path::new("./data/apes.fasta"))
        .unwrap();
    let res = evol_tree.run_model("M0", &RunOptions::default());
    assert!(res.is_err());
    assert!(res.unwrap_err().to_string().contains("/nonexistent/bin/codeml"));
    assert!(evol_tree.models().is_empty());
}

#[cfg(unix)]
mod stub_codeml {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use approx::assert_relative_eq;
    use tempfile::{tempdir, TempDir};

    use crate::evol_tree::{EvolTree, RunOptions};

    /// Script standing in for codeml: echoes its argument and copies a stored output file.
    fn stub(dir: &Path, model: &str) -> PathBuf {
        let out = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("data/codeml")
            .join(model)
            .join("out");
        let script = dir.join("codeml");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"stub codeml $1\"\ncp '{}' out\n", out.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn linked_tree(model: &str) -> (TempDir, EvolTree) {
        let temp_dir = tempdir().unwrap();
        let codeml = stub(temp_dir.path(), model);
        let mut evol_tree = EvolTree::from_newick_file(Path::new("./data/apes.newick"))
            .unwrap()
            .with_workdir(temp_dir.path().join("work"))
            .with_codeml(codeml);
        evol_tree
            .link_to_alignment(Path::new("./data/apes.fasta"))
            .unwrap();
        (temp_dir, evol_tree)
    }

    #[test]
    fn run_writes_inputs_and_links_results() {
        let (_temp_dir, mut evol_tree) = linked_tree("bsA");
        evol_tree.mark_by_paml_ids(&[7], None).unwrap();
        let run = evol_tree
            .run_model("bsA.homo_pan", &RunOptions::default())
            .unwrap();

        assert_eq!(run.model, "bsA.homo_pan");
        assert_eq!(run.stdout, "stub codeml tmp.ctl\n");
        assert_eq!(
            fs::read_to_string(run.dir.join("tree")).unwrap(),
            "(Gorilla,(Homo,Pan) #1,(Hylobates,Pongo));"
        );
        let algn = fs::read_to_string(run.dir.join("algn")).unwrap();
        assert!(algn.starts_with(" 5 27\nGorilla\n"));
        let ctl = fs::read_to_string(run.dir.join("tmp.ctl")).unwrap();
        assert!(ctl.contains("          model = 2\n"));
        assert!(ctl.contains("        NSsites = 2\n"));

        let model = evol_tree.get_evol_model("bsA.homo_pan").unwrap();
        assert_relative_eq!(model.lnl.unwrap(), -1077.75);
        assert_eq!(model.run.as_deref(), Some("stub codeml tmp.ctl\n"));
    }

    #[test]
    fn models_without_marks_get_plain_tree() {
        let (_temp_dir, mut evol_tree) = linked_tree("fb");
        evol_tree.mark_by_paml_ids(&[7], None).unwrap();
        let run = evol_tree.run_model("fb", &RunOptions::default()).unwrap();
        assert_eq!(
            fs::read_to_string(run.dir.join("tree")).unwrap(),
            "(Gorilla,(Homo,Pan),(Hylobates,Pongo));"
        );
    }

    #[test]
    fn rerun_goes_to_new_directory() {
        let (temp_dir, mut evol_tree) = linked_tree("M0");
        let first = evol_tree.run_model("M0", &RunOptions::default()).unwrap();
        let second = evol_tree.run_model("M0", &RunOptions::default()).unwrap();
        assert_eq!(first.model, "M0");
        assert_eq!(second.model, "M0__1");
        assert_eq!(second.dir, temp_dir.path().join("work").join("M0__1"));
        assert_eq!(evol_tree.models().names(), ["M0", "M0__1"]);
    }

    #[test]
    fn run_with_ctrl_overrides() {
        let (_temp_dir, mut evol_tree) = linked_tree("M0");
        let options = RunOptions {
            ctrl: vec![(String::from("kappa"), String::from("3.5"))],
            keep: false,
            ..Default::default()
        };
        let run = evol_tree.run_model("M0", &options).unwrap();
        let ctl = fs::read_to_string(run.dir.join("tmp.ctl")).unwrap();
        assert!(ctl.contains("          kappa = 3.5\n"));
        assert!(evol_tree.models().is_empty());
    }

    #[test]
    fn run_with_own_control_file() {
        let (_temp_dir, mut evol_tree) = linked_tree("M0");
        let options = RunOptions {
            ctrl_string: Some(String::from("seqfile = algn\n")),
            ..Default::default()
        };
        let run = evol_tree.run_model("M0", &options).unwrap();
        assert_eq!(
            fs::read_to_string(run.dir.join("tmp.ctl")).unwrap(),
            "seqfile = algn\n"
        );
        assert!(evol_tree.get_evol_model("M0").unwrap().is_fitted());
    }
}
