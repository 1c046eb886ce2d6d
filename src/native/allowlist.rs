use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Programs the helper may launch directly.
pub const LAUNCH_ALLOWED: [&str; 4] = ["wireshark", "notepad", "code", "calc"];

pub const INPUT_PLACEHOLDER: &str = "<ID>";

static REPAIR_INPUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\\{}-]+$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairCategory {
    Network,
    SystemFile,
    Disk,
    WindowsUpdate,
    Defender,
    Services,
    Performance,
    Drivers,
    Events,
    Cleanup,
}

impl RepairCategory {
    pub fn title(self) -> &'static str {
        match self {
            Self::Network => "Network and Internet repair",
            Self::SystemFile => "System file repair",
            Self::Disk => "Disk and storage repair",
            Self::WindowsUpdate => "Windows Update repair",
            Self::Defender => "Windows Defender repair",
            Self::Services => "Service and system recovery",
            Self::Performance => "Performance and memory diagnostics",
            Self::Drivers => "Driver and device reset",
            Self::Events => "Event log and crash diagnosis",
            Self::Cleanup => "System cleanup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairCommand {
    pub id: &'static str,
    pub category: RepairCategory,
    pub title: &'static str,
    pub script: &'static str,
    pub validation_hint: &'static str,
    pub confirm: Option<&'static str>,
    pub input_label: Option<&'static str>,
    pub danger: bool,
}

impl RepairCommand {
    pub fn takes_input(&self) -> bool {
        self.script.contains(INPUT_PLACEHOLDER)
    }
}

const fn cmd(
    id: &'static str,
    category: RepairCategory,
    title: &'static str,
    script: &'static str,
    validation_hint: &'static str,
) -> RepairCommand {
    RepairCommand {
        id,
        category,
        title,
        script,
        validation_hint,
        confirm: None,
        input_label: None,
        danger: false,
    }
}

const fn guarded(command: RepairCommand, confirm: &'static str, danger: bool) -> RepairCommand {
    RepairCommand {
        confirm: Some(confirm),
        danger,
        ..command
    }
}

const fn with_input(command: RepairCommand, label: &'static str) -> RepairCommand {
    RepairCommand {
        input_label: Some(label),
        ..command
    }
}

use RepairCategory::*;

/// Every PowerShell command the helper will ever run. Nothing outside this
/// table can reach the shell.
pub static REPAIR_COMMANDS: [RepairCommand; 39] = [
    cmd("net-restart", Network, "Restart network adapters", r#"Restart-NetAdapter -Name "*""#,
        "Adapters restarted. Reconnect to Wi-Fi/Ethernet if needed."),
    cmd("net-reset-ip", Network, "Reset IP addressing", r#"Reset-NetIPAddress -InterfaceAlias "*""#,
        "IPs reset. If still offline, re-run DHCP enable."),
    cmd("net-enable-dhcp", Network, "Enable DHCP on all interfaces", r#"Set-NetIPInterface -InterfaceAlias "*" -Dhcp Enabled"#,
        "DHCP re-enabled. Test connectivity again."),
    cmd("net-dns-flush", Network, "Clear DNS cache", "Clear-DnsClientCache", "DNS cache cleared."),
    cmd("net-test-basic", Network, "Test network reachability", "Test-NetConnection",
        "Connectivity test complete. See output for route status."),
    cmd("net-test-443", Network, "Test HTTPS to google.com:443", "Test-NetConnection google.com -Port 443",
        "HTTPS probe finished."),
    cmd("net-tcp-open", Network, "List active TCP connections", "Get-NetTCPConnection", "TCP table captured."),
    cmd("dism-restorehealth", SystemFile, "Repair component store (RestoreHealth)", "Repair-WindowsImage -Online -RestoreHealth",
        "DISM RestoreHealth finished. Reboot if repairs were applied."),
    cmd("dism-scanhealth", SystemFile, "Scan component store (ScanHealth)", "Repair-WindowsImage -Online -ScanHealth",
        "Scan completed. If corruption found, run RestoreHealth next."),
    cmd("dism-clean", SystemFile, "Start component cleanup", "Repair-WindowsImage -Online -StartComponentCleanup",
        "Component cleanup done. Reboot to finalize if pending."),
    cmd("disk-volumes", Disk, "List volumes", "Get-Volume", "Volume list captured."),
    cmd("disk-physical", Disk, "List physical disks", "Get-PhysicalDisk", "Physical disk list captured."),
    cmd("disk-repair-scan", Disk, "Scan C: (online)", "Repair-Volume -DriveLetter C -Scan",
        "Scan completed. If issues found, run OfflineScanAndFix."),
    cmd("disk-repair-offline", Disk, "Offline scan and fix C:", "Repair-Volume -DriveLetter C -OfflineScanAndFix",
        "Offline scan queued. Reboot to complete repairs."),
    cmd("disk-repair-spot", Disk, "Spot fix C:", "Repair-Volume -DriveLetter C -SpotFix", "SpotFix queued or completed."),
    cmd("wu-restart-wuauserv", WindowsUpdate, "Restart Windows Update service", "Restart-Service wuauserv",
        "wuauserv restarted."),
    cmd("wu-restart-bits", WindowsUpdate, "Restart BITS service", "Restart-Service bits", "BITS restarted."),
    cmd("wu-restart-cryptsvc", WindowsUpdate, "Restart Cryptographic service", "Restart-Service cryptsvc",
        "Cryptographic service restarted."),
    cmd("wu-log", WindowsUpdate, "Generate Windows Update log", "Get-WindowsUpdateLog",
        "Log generation requested. Review the .log on Desktop."),
    cmd("wd-update", Defender, "Update Defender signatures", "Update-MpSignature", "Signature update requested."),
    cmd("wd-quick-scan", Defender, "Quick scan", "Start-MpScan -ScanType QuickScan",
        "Quick scan triggered. Keep the window open until complete."),
    cmd("wd-full-scan", Defender, "Full scan", "Start-MpScan -ScanType FullScan",
        "Full scan started. This may take a while."),
    cmd("wd-status", Defender, "Defender status", "Get-MpComputerStatus", "Status captured."),
    cmd("svc-list", Services, "List services", "Get-Service", "Service list captured."),
    guarded(
        cmd("svc-restart-all", Services, "Restart all services", r#"Restart-Service -Name "*""#,
            "Bulk restart attempted. Some services may refuse."),
        "Restart all services? Services with dependencies may briefly interrupt apps.",
        false,
    ),
    cmd("svc-wu-auto", Services, "Set Windows Update to Automatic", r#"Set-Service -Name "wuauserv" -StartupType Automatic"#,
        "Startup type set to Automatic for wuauserv."),
    cmd("svc-bits-auto", Services, "Set BITS to Automatic", r#"Set-Service -Name "bits" -StartupType Automatic"#,
        "Startup type set to Automatic for BITS."),
    guarded(
        cmd("svc-stop-all-proc", Services, "Stop all processes (danger)", r#"Stop-Process -Name "*""#,
            "Process stop issued. System may close running apps."),
        "This will attempt to stop all processes and can disrupt the system. Continue?",
        true,
    ),
    cmd("perf-top-cpu", Performance, "Top 20 by CPU", "Get-Process | Sort-Object CPU -Descending | Select-Object -First 20",
        "CPU-heavy process list captured."),
    cmd("perf-top-ram", Performance, "Top 20 by memory",
        "Get-Process | Sort-Object WorkingSet -Descending | Select-Object -First 20", "Memory-heavy process list captured."),
    cmd("perf-clear-host", Performance, "Clear host buffer", "Clear-Host", "Host buffer cleared."),
    cmd("pnp-list", Drivers, "List Plug and Play devices", "Get-PnpDevice", "PnP device list captured."),
    guarded(
        with_input(
            cmd("pnp-disable", Drivers, "Disable device by InstanceId", r#"Disable-PnpDevice -InstanceId "<ID>" -Confirm:$false"#,
                "Disable command issued."),
            "InstanceId",
        ),
        "Disable this device? Ensure you selected the correct InstanceId.",
        true,
    ),
    with_input(
        cmd("pnp-enable", Drivers, "Enable device by InstanceId", r#"Enable-PnpDevice -InstanceId "<ID>" -Confirm:$false"#,
            "Enable command issued."),
        "InstanceId",
    ),
    cmd("evt-system", Events, "System event log (latest 200)", "Get-EventLog -LogName System -Newest 200",
        "System event sample captured."),
    cmd("evt-app", Events, "Application event log (latest 200)", "Get-EventLog -LogName Application -Newest 200",
        "Application event sample captured."),
    cmd("evt-winevent", Events, "WinEvent (System, 200)", "Get-WinEvent -LogName System -MaxEvents 200",
        "WinEvent sample captured."),
    guarded(
        cmd("cleanup-temp-user", Cleanup, "Clean user temp", r#"Remove-Item -Path "$env:TEMP\*" -Recurse -Force"#,
            "User temp cleanup requested."),
        "Delete all user temp files now?",
        true,
    ),
    guarded(
        cmd("cleanup-temp-windows", Cleanup, "Clean Windows temp", r#"Remove-Item -Path "C:\Windows\Temp\*" -Recurse -Force"#,
            "Windows temp cleanup requested."),
        "Delete Windows temp files now?",
        true,
    ),
];

pub fn repair_command(id: &str) -> Option<&'static RepairCommand> {
    REPAIR_COMMANDS.iter().find(|command| command.id == id)
}

pub fn is_valid_repair_input(value: &str) -> bool {
    REPAIR_INPUT.is_match(value)
}

pub fn is_launch_allowed(command: &str) -> bool {
    LAUNCH_ALLOWED.contains(&command)
}

/// Resolves a command id to the exact script to run. The placeholder is only
/// filled with input that passes the strict character check.
pub fn build_repair_script(id: &str, input: Option<&str>) -> AppResult<String> {
    let command = repair_command(id).ok_or_else(|| AppError::Policy(format!("unknown repair command: {id}")))?;
    if !command.takes_input() {
        return Ok(command.script.to_string());
    }
    match input.map(str::trim) {
        Some(value) if !value.is_empty() && is_valid_repair_input(value) => {
            Ok(command.script.replacen(INPUT_PLACEHOLDER, value, 1))
        }
        _ => Err(AppError::Policy(format!("invalid input for repair command: {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_ids_are_unique() {
        let ids: HashSet<&str> = REPAIR_COMMANDS.iter().map(|command| command.id).collect();
        assert_eq!(ids.len(), REPAIR_COMMANDS.len());
    }

    #[test]
    fn only_device_commands_take_input() {
        let with_input: Vec<&str> = REPAIR_COMMANDS
            .iter()
            .filter(|command| command.takes_input())
            .map(|command| command.id)
            .collect();
        assert_eq!(with_input, vec!["pnp-disable", "pnp-enable"]);
        assert!(REPAIR_COMMANDS
            .iter()
            .all(|command| command.takes_input() == command.input_label.is_some()));
    }

    #[test]
    fn unknown_ids_are_refused() {
        assert!(matches!(build_repair_script("rm-rf", None), Err(AppError::Policy(_))));
        assert_eq!(build_repair_script("net-dns-flush", None).expect("known"), "Clear-DnsClientCache");
    }

    #[test]
    fn placeholder_accepts_instance_ids_only() {
        let script = build_repair_script("pnp-disable", Some(r"USB\VID_046D&PID_C52B\6&1A2B")).err();
        assert!(script.is_some(), "ampersand must be rejected");

        let script = build_repair_script("pnp-enable", Some(r"PCI\VEN_8086.DEV_15B8\{4D36E972}:0")).expect("valid id");
        assert_eq!(script, r#"Enable-PnpDevice -InstanceId "PCI\VEN_8086.DEV_15B8\{4D36E972}:0" -Confirm:$false"#);

        for bad in ["", "   ", "x\"; Remove-Item C:\\", "a b", "$(calc)"] {
            assert!(build_repair_script("pnp-enable", Some(bad)).is_err(), "{bad:?} accepted");
        }
        assert!(build_repair_script("pnp-enable", None).is_err());
    }

    #[test]
    fn launch_allow_list_is_exact() {
        assert!(is_launch_allowed("calc"));
        assert!(!is_launch_allowed("Calc"));
        assert!(!is_launch_allowed("powershell"));
        assert!(!is_launch_allowed("calc.exe"));
    }
}
