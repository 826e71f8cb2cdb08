use crate::core::dependencies::DependencyStatus;
use crate::core::manager::DownloadManager;

pub async fn check_dependencies(manager: &DownloadManager) -> Vec<DependencyStatus> {
    manager.check_dependencies().await
}

pub fn render_report(report: &[DependencyStatus]) -> String {
    report
        .iter()
        .map(|dep| {
            let state = if dep.installed { "ok" } else { "missing" };
            match &dep.version {
                Some(version) if dep.installed => format!("{:<16} {:<8} {}", dep.name, state, version),
                _ => format!("{:<16} {}", dep.name, state),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
