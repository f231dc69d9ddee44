use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG: &str = r#"template = "templates/model"
directives = "to_replace_{{lowercase_name}}.py"

[[placements]]
from = "modeling_{{lowercase_name}}.py"
to = "src/pkg/modeling_{{lowercase_name}}.py"

[[placements]]
from = "{{lowercase_name}}.rst"
to = "docs/model_doc/{{lowercase_name}}.rst"
"#;

const MANIFEST: &str = r#"directory = "cookiecutter-template-{{lowercase_name}}"

[[variables]]
name = "model_name"
prompt = "Model name"
default = "BrandNewBert"

[[variables]]
name = "lowercase_name"
default = "{{snakecase model_name}}"
"#;

const DIRECTIVES: &str = r##"## Insertions for {{model_name}}.
## Lines with a double hash are never copied.
# To replace in: "src/pkg/__init__.py"
# Below: "# Models"
# Replace with:
from .modeling_{{lowercase_name}} import {{model_name}}Model
# End.
"##;

const INIT: &str = "import os\n# Models\nfrom .modeling_bert import BertModel\n";

fn graft() -> Command {
    Command::cargo_bin("graft").unwrap()
}

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let files = root.join("templates").join("model").join("files");
    fs::create_dir_all(&files).unwrap();
    fs::create_dir_all(root.join("src").join("pkg")).unwrap();

    fs::write(root.join("graft.toml"), CONFIG).unwrap();
    fs::write(root.join("templates/model/template.toml"), MANIFEST).unwrap();
    fs::write(
        files.join("modeling_{{lowercase_name}}.py"),
        "class {{model_name}}Model:\n    pass\n",
    )
    .unwrap();
    fs::write(files.join("{{lowercase_name}}.rst"), "{{model_name}}\n").unwrap();
    fs::write(files.join("to_replace_{{lowercase_name}}.py"), DIRECTIVES).unwrap();
    fs::write(root.join("src/pkg/__init__.py"), INIT).unwrap();
    (dir, root)
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn add_generates_moves_patches_and_cleans_up() {
    let (_dir, root) = project();

    graft()
        .current_dir(&root)
        .args(["add", "--defaults", "-d", "model_name=TinyNet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 1 insertion(s)"));

    assert_eq!(
        read(root.join("src/pkg/modeling_tiny_net.py")),
        "class TinyNetModel:\n    pass\n"
    );
    assert_eq!(read(root.join("docs/model_doc/tiny_net.rst")), "TinyNet\n");
    assert_eq!(
        read(root.join("src/pkg/__init__.py")),
        "import os\n# Models\nfrom .modeling_tiny_net import TinyNetModel\nfrom .modeling_bert import BertModel\n"
    );
    assert!(!root.join("cookiecutter-template-tiny_net").exists());
}

#[test]
fn add_refuses_stale_generated_directory() {
    let (_dir, root) = project();
    fs::create_dir(root.join("cookiecutter-template-old")).unwrap();

    graft()
        .current_dir(&root)
        .args(["add", "--defaults"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cookiecutter-template-old"));

    assert_eq!(read(root.join("src/pkg/__init__.py")), INIT);
}

#[test]
fn add_dry_run_writes_nothing() {
    let (_dir, root) = project();

    graft()
        .current_dir(&root)
        .args(["--dry-run", "add", "--defaults"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would move modeling_brand_new_bert.py"))
        .stdout(predicate::str::contains("lowercase_name = brand_new_bert"));

    assert!(!root.join("cookiecutter-template-brand_new_bert").exists());
    assert!(!root.join("src/pkg/modeling_brand_new_bert.py").exists());
    assert_eq!(read(root.join("src/pkg/__init__.py")), INIT);
}

#[test]
fn patch_applies_and_consumes_directive_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("target.txt"), "A\nANCHOR\nB\n").unwrap();
    fs::write(
        root.join("directives.txt"),
        "# To replace in: \"target.txt\"\n# Below: \"ANCHOR\"\nX\nY\n# End.\n",
    )
    .unwrap();

    graft()
        .current_dir(root)
        .args(["patch", "directives.txt"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    assert_eq!(read(root.join("target.txt")), "A\nANCHOR\nX\nY\nB\n");
    assert!(!root.join("directives.txt").exists());
}

#[test]
fn patch_reports_missing_anchor() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("target.txt"), "A\nB\n").unwrap();
    fs::write(
        root.join("directives.txt"),
        "# To replace in: \"target.txt\"\n# Below: \"Z\"\nX\n# End.\n",
    )
    .unwrap();

    graft()
        .current_dir(root)
        .args(["patch", "directives.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line `Z` was not found"));

    assert_eq!(read(root.join("target.txt")), "A\nB\n");
    assert!(root.join("directives.txt").exists());
}

#[test]
fn config_generate_then_show() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    graft()
        .current_dir(root)
        .env("XDG_CONFIG_HOME", root.join("xdg"))
        .args(["config", "generate"])
        .assert()
        .success();
    assert!(root.join("graft.toml").exists());

    graft()
        .current_dir(root)
        .args(["config", "set-template", "templates/other"])
        .assert()
        .success();

    graft()
        .current_dir(root)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Template: templates/other"));
}
