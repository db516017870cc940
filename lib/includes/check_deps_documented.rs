// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Shared by every crate in the workspace through `include!`, so that each
// manifest dependency carries a short justification in the crate's DEPS.md.
use std::collections::BTreeSet;
use std::fs;
use toml::Value;

fn manifest_deps() -> BTreeSet<String> {
    let manifest = fs::read_to_string("Cargo.toml").expect("Cargo.toml must be readable");
    let Ok(Value::Table(table)) = manifest.parse::<Value>() else {
        panic!("Cargo.toml should not be malformed");
    };

    ["dependencies", "build-dependencies", "dev-dependencies"]
        .iter()
        .filter_map(|section| table.get(*section).and_then(Value::as_table))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn documented_deps() -> BTreeSet<String> {
    let markdown = fs::read_to_string("DEPS.md").expect("DEPS.md must be readable");
    markdown
        .lines()
        .filter_map(|line| line.strip_prefix("## "))
        .map(|dep| dep.trim().to_string())
        .collect()
}

#[test]
fn check_deps_documented() {
    let listed = manifest_deps();
    let documented = documented_deps();

    let undocumented = listed.difference(&documented).collect::<Vec<_>>();
    let stale = documented.difference(&listed).collect::<Vec<_>>();

    assert!(
        undocumented.is_empty(),
        "some Cargo.toml dependencies are not in DEPS.md: {undocumented:?}"
    );
    assert!(
        stale.is_empty(),
        "DEPS.md lists dependencies no longer present in Cargo.toml: {stale:?}"
    );
}
