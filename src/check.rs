use anyhow::{Context, Result};
use ejs::{Options, Renderer, Segment};
use std::path::{Path, PathBuf};

pub struct CheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checked: usize,
}

/// 逐个编译模板文件；目录会递归展开为其中的 `.ejs` 文件
pub fn run(renderer: &Renderer, paths: &[PathBuf], options: &Options) -> Result<CheckResult> {
    let mut files = Vec::new();
    for path in paths {
        collect(path, &mut files)?;
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for file in &files {
        check_file(renderer, file, options, &mut errors, &mut warnings);
    }

    Ok(CheckResult {
        errors,
        warnings,
        checked: files.len(),
    })
}

fn collect(path: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if !path.is_dir() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("读取目录 {} 失败", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            collect(&entry, files)?;
        } else if entry.extension().is_some_and(|ext| ext == "ejs") {
            files.push(entry);
        }
    }
    Ok(())
}

fn check_file(
    renderer: &Renderer,
    file: &Path,
    options: &Options,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(e) => {
            errors.push(format!("读取 {} 失败：{e}", file.display()));
            return;
        }
    };

    let options = options.clone().filename(file.display().to_string());
    match renderer.compile(&source, &options) {
        Ok(template) => {
            let has_tags = template
                .body()
                .segments
                .iter()
                .any(|segment| !matches!(segment, Segment::Literal(_)));
            if !has_tags {
                warnings.push(format!("{} 不含任何标签", file.display()));
            }
        }
        Err(e) => errors.push(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_broken_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.ejs"), "<%= a %>").unwrap();
        std::fs::write(dir.path().join("plain.ejs"), "no tags").unwrap();
        std::fs::write(dir.path().join("bad.ejs"), "<% if (a) { %>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "<%").unwrap();

        let result = run(&Renderer::new(), &[dir.path().to_path_buf()], &Options::default()).unwrap();
        assert_eq!(result.checked, 3);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("bad.ejs:1"));
        assert_eq!(result.warnings.len(), 1);
    }
}
