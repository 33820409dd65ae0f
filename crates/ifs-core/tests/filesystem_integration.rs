// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::io::{Read, Write};

use ifs_core::{
    CopyOption, IfsConfig, IfsError, IfsPath, IfsProvider, OpenOption, VirtualFileSystem,
};

fn provider_in(dir: &tempfile::TempDir) -> IfsProvider {
    let mut config = IfsConfig::with_local_store(dir.path().join("content"));
    config.catalog = Some(dir.path().join("ifs.sqlite"));
    IfsProvider::new(config).unwrap()
}

#[test]
fn uri_round_trip() {
    for uri in ["ifs:///derivate_1:/a/b/test.txt", "ifs:///derivate_1:/"] {
        let path = IfsPath::from_uri(uri).unwrap();
        assert_eq!(path.to_uri().unwrap(), uri);
        assert_eq!(IfsPath::parse(&path.to_string()).unwrap(), path);
    }
    assert!(IfsPath::from_uri("ifs:///derivate_1").unwrap().is_root());
    assert!(matches!(IfsPath::from_uri("file:///tmp/x"), Err(IfsError::NotFound(_))));
}

#[test]
fn write_copy_move_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let provider = provider_in(&dir);
    let src = provider.resolve_uri("ifs:///mir_derivate_1:/docs/readme.txt").unwrap();

    let mut channel = provider
        .open(&src, &[OpenOption::CreateNew, OpenOption::Write], &[])
        .unwrap();
    channel.write_all(b"hello").unwrap();
    channel.close().unwrap();

    let copy = IfsPath::parse("mir_derivate_1:/docs/copy.txt").unwrap();
    provider.copy(&src, &copy, &[CopyOption::CopyAttributes]).unwrap();
    let moved = IfsPath::parse("mir_derivate_1:/archive/readme.txt").unwrap();
    provider.move_entry(&src, &moved, &[]).unwrap();
    provider.persist().unwrap();
    drop(provider);

    let provider = provider_in(&dir);
    assert!(matches!(provider.read_attrs(&src), Err(IfsError::NotFound(_))));
    for path in [&copy, &moved] {
        let attrs = provider.read_attrs(path).unwrap();
        assert_eq!(attrs.md5.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        let mut content = String::new();
        provider
            .open(path, &[OpenOption::Read], &[])
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");
    }

    let listing = provider.list(&IfsPath::parse("mir_derivate_1:/").unwrap()).unwrap();
    let names: Vec<String> = listing.iter().unwrap().map(|p| p.to_string()).collect();
    assert_eq!(names, vec!["mir_derivate_1:/archive", "mir_derivate_1:/docs"]);
}
