use parc_adapters::{normalize_organizations, ArchivePageSource, ArchiveSource, RawPayload};

fn fixture_payload() -> RawPayload {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures/gsoc-archive/2019.html");
    RawPayload {
        program: "GSoC".to_string(),
        year: 2019,
        url: "https://archive.example/2019/projects".to_string(),
        body: std::fs::read_to_string(path).expect("read archive fixture"),
    }
}

#[test]
fn fixture_page_parses_into_grouped_projects() {
    let source = ArchivePageSource::new("https://archive.example/{year}/projects");
    let organizations = source.parse(&fixture_payload()).unwrap();
    let projects = normalize_organizations("GSoC", 2019, organizations);

    // Three complete cards survive; the card without a link does not.
    assert_eq!(projects.len(), 3);

    let orbit: Vec<_> = projects
        .iter()
        .filter(|p| p.organization_name == "Orbit Compilers")
        .collect();
    assert_eq!(orbit.len(), 2);
    assert!(orbit.iter().all(|p| p.topics == vec!["compilers", "llvm"]));

    let tidepool = projects
        .iter()
        .find(|p| p.organization_name == "Tidepool Data")
        .unwrap();
    assert_eq!(tidepool.project_name, "Streaming Checkpoint Compaction");
    assert_eq!(
        tidepool.project_url,
        "https://archive.example/projects/tidepool-compaction"
    );
    assert!(projects.iter().all(|p| p.year == 2019 && p.program == "GSoC"));
}
