use crate::config::MonitorConfig;
use crate::session::SerialSession;
use log::info;

/// Writes the literal command configured for `name`, e.g. switching the
/// device into a sensor mode.
pub fn do_action(
    session: &SerialSession,
    config: &MonitorConfig,
    name: &str,
) -> Result<(), String> {
    let action = config
        .actions
        .get(name)
        .ok_or_else(|| format!("unknown action: {}", name))?;
    if action.command.contains('\n') {
        return Result::Err(format!("action {} has a multi-line command", name));
    }
    info!("running action {} ({})", name, action.command);
    return session
        .write_line(&action.command)
        .map_err(|err| format!("action {} failed: {}", name, err));
}
