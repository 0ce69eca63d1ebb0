mod common;

use cilpatch::{prelude::*, Error};
use common::*;

#[test]
fn patch_crafted_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &build_image());
    let output = dir.path().join("Assembly-CSharp.mod.dll");

    let config = PatchConfig::default().with_entries(["A.dll", "B.dll"]);
    let report = patch_file(&PeStore, &input, &output, &config).unwrap();

    assert_eq!(report.type_name, "Starter");
    assert_eq!(report.method_name, "Awake");
    assert_eq!(report.method_token, Token(0x0600_0001));
    assert_eq!(report.previous_size, 1);
    assert_eq!(report.array_size, 3);
    assert_eq!(report.inserted, 8);
    assert_eq!(report.max_stack, 11);

    // The input is left alone
    assert_eq!(std::fs::read(&input).unwrap(), build_image());

    let module = Module::from_file(&output).unwrap();
    assert_eq!(module.name, "Game.dll");

    let instructions = awake(&module);
    assert_eq!(
        mnemonics(&instructions),
        [
            "ldarg.0",
            "brfalse.s",
            "ldnull",
            "call",
            "ldc.i4",
            "newarr",
            "dup",
            "ldc.i4.0",
            "ldstr",
            "stelem.ref",
            "dup",
            "ldc.i4",
            "ldstr",
            "stelem.ref",
            "dup",
            "ldc.i4",
            "ldstr",
            "stelem.ref",
            "call",
            "ret",
        ]
    );
    assert_eq!(instructions[4].ldc_i4_value(), Some(3));
    assert_eq!(instructions[11].ldc_i4_value(), Some(1));
    assert_eq!(instructions[15].ldc_i4_value(), Some(2));
    assert_eq!(
        literals(&instructions),
        ["UnityEngine.dll", "A.dll", "B.dll"]
    );
    assert!(instructions[18].is_call_to("SetAdditionalAssemblies"));
    assert!(instructions[3].is_call_to("add_eventLogMessage"));
}

#[test]
fn branch_still_reaches_return() {
    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &build_image());
    let output = dir.path().join("out.dll");

    let config = PatchConfig::default().with_entries(["A.dll", "B.dll", "C.dll"]);
    patch_file(&PeStore, &input, &output, &config).unwrap();

    let module = Module::from_file(&output).unwrap();
    let starter = module.types().find(|ty| ty.name == "Starter").unwrap();
    let body = starter.methods[0].body().unwrap();

    let (_, branch) = body.instructions.iter().nth(1).unwrap();
    let (ret, _) = body.instructions.iter().last().unwrap();
    assert_eq!(branch.targets(), [ret]);
}

#[test]
fn zero_entries_only_rewrites_size() {
    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &build_image());
    let output = dir.path().join("out.dll");

    let config = PatchConfig::default().with_entries(Vec::<String>::new());
    let report = patch_file(&PeStore, &input, &output, &config).unwrap();

    assert_eq!(report.array_size, 1);
    assert_eq!(report.inserted, 0);

    let original = awake(&Module::from_mem(build_image()).unwrap());
    let patched = awake(&Module::from_file(&output).unwrap());
    assert_eq!(patched.len(), original.len());
    assert_eq!(patched[4].ldc_i4_value(), Some(1));
    assert_eq!(literals(&patched), literals(&original));
}

#[test]
fn ambiguous_anchor_writes_nothing() {
    // Turn the add_eventLogMessage call into a second SetAdditionalAssemblies call
    let image = build_image_with(|code| {
        code[5..9].copy_from_slice(&SET_ADDITIONAL_ASSEMBLIES_TOKEN.to_le_bytes());
    });

    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &image);
    let output = dir.path().join("out.dll");

    let result = patch_file(&PeStore, &input, &output, &PatchConfig::default());
    match result {
        Err(Error::AnchorAmbiguous { predicate, matches }) => {
            assert_eq!(predicate, "'call SetAdditionalAssemblies'");
            assert_eq!(matches, 2);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn unexpected_size_constant() {
    // ldc.i4.1 -> ldnull
    let image = build_image_with(|code| code[9] = 0x14);

    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &image);
    let output = dir.path().join("out.dll");

    let result = patch_file(&PeStore, &input, &output, &PatchConfig::default());
    assert!(matches!(result, Err(Error::UnexpectedAnchorShape { .. })));
    assert!(!output.exists());
}

#[test]
fn missing_type_and_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &build_image());
    let output = dir.path().join("out.dll");

    let config = PatchConfig::default().with_type_name("Loader");
    let result = patch_file(&PeStore, &input, &output, &config);
    assert!(matches!(result, Err(Error::TypeNotFound { matches: 0, .. })));

    let result = patch_file(
        &PeStore,
        &dir.path().join("missing.dll"),
        &output,
        &PatchConfig::default(),
    );
    assert!(matches!(result, Err(Error::InputNotFound(_))));
    assert!(!output.exists());
}

#[test]
fn patch_in_place_overwrites_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let input = stage_image(dir.path(), &build_image());

    patch_file(&PeStore, &input, &input, &PatchConfig::default()).unwrap();

    let patched = awake(&Module::from_file(&input).unwrap());
    assert_eq!(
        literals(&patched),
        ["UnityEngine.dll", "Assembly-CSharp.dll", "ColossalManaged.dll"]
    );
    // Only the target remains in the directory
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
