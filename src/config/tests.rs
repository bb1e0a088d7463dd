use super::*;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.codegen.worklist_capacity, 200);
    assert_eq!(config.vm.memory_size, 1 << 20);
    assert_eq!(config.vm.heap_size, 1 << 19);
    assert!(config.vm.step_limit > 0);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    std::fs::write(
        &path,
        r#"
# tuned for the scenario tests
[codegen]
worklist_capacity = 16

[vm]
memory_size = 65_536   # 64 KiB
heap_size = 32768
step_limit = 1000
"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.codegen.worklist_capacity, 16);
    assert_eq!(config.vm.memory_size, 65_536);
    assert_eq!(config.vm.heap_size, 32_768);
    assert_eq!(config.vm.step_limit, 1000);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    std::fs::write(&path, "[vm]\nstep_limit = 42\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.codegen, CodegenConfig::default());
    assert_eq!(config.vm.step_limit, 42);
    assert_eq!(config.vm.memory_size, VmConfig::default().memory_size);
}

#[test]
fn test_invalid_value_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    std::fs::write(&path, "[codegen]\nworklist_capacity = lots\n").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("invalid codegen.worklist_capacity: lots"));
}

#[test]
fn test_zero_capacity_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    std::fs::write(&path, "[codegen]\nworklist_capacity = 0\n").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("must be > 0"));
}

#[test]
fn test_oversized_capacity_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    // 2^30 words would need 2^32 bytes of worklist
    std::fs::write(&path, "[codegen]\nworklist_capacity = 1073741824\n").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("must be at most"));

    std::fs::write(
        &path,
        format!("[codegen]\nworklist_capacity = {}\n", MAX_WORKLIST_CAPACITY),
    )
    .unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.codegen.worklist_capacity, MAX_WORKLIST_CAPACITY);
}

#[test]
fn test_heap_must_fit_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");
    std::fs::write(&path, "[vm]\nmemory_size = 4096\nheap_size = 8192\n").unwrap();

    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("vm.heap_size"));
}

#[test]
fn test_unknown_key_and_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rangec.toml");

    std::fs::write(&path, "[codegen]\noptimize = true\n").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("unknown key codegen.optimize"));

    std::fs::write(&path, "[linker]\n").unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(err.message.contains("unknown section [linker]"));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.message.contains("cannot read config"));
}

#[test]
fn test_discover_walks_up() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE),
        "[codegen]\nworklist_capacity = 8\n",
    )
    .unwrap();
    let nested = dir.path().join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();

    assert_eq!(
        Config::find(&nested),
        Some(dir.path().join(CONFIG_FILE))
    );
    let config = Config::discover(&nested).unwrap();
    assert_eq!(config.codegen.worklist_capacity, 8);
}

#[test]
fn test_discover_without_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    // tempdir ancestors (/tmp, /) are not expected to carry a rangec.toml
    if Config::find(dir.path()).is_none() {
        assert_eq!(Config::discover(dir.path()).unwrap(), Config::default());
    }
}
