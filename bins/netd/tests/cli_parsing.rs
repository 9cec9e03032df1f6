//! CLI tests for netd.
//!
//! The one-shot commands are pure transforms, so these run without network
//! access or root privileges.

use assert_cmd::Command;
use predicates::prelude::*;

fn netd_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_netd"))
}

mod global_flags {
    use super::*;

    #[test]
    fn test_help() {
        netd_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Node network configuration tool"));
    }

    #[test]
    fn test_version() {
        netd_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("netd"));
    }

    #[test]
    fn test_invalid_subcommand() {
        netd_cmd()
            .arg("invalid_command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }
}

mod nft_command {
    use super::*;

    #[test]
    fn test_compile_from_stdin() {
        let rule = r#"{
            "sourceAddress": {"includeSubnets": ["10.0.0.0/8"]},
            "verdict": "drop"
        }"#;

        netd_cmd()
            .args(["nft", "compile"])
            .write_stdin(rule)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"rules\""))
            .stdout(predicate::str::contains("\"sets\""));
    }

    #[test]
    fn test_empty_rule_compiles_to_nothing() {
        netd_cmd()
            .args(["nft", "compile", "-"])
            .write_stdin("{}")
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"{"rules":[],"sets":[]}"#));
    }

    #[test]
    fn test_invalid_json() {
        netd_cmd()
            .args(["nft", "compile"])
            .write_stdin("{not json")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error"));
    }

    #[test]
    fn test_missing_file() {
        netd_cmd()
            .args(["nft", "compile", "/nonexistent/rule.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("reading /nonexistent/rule.json"));
    }
}

mod link_command {
    use super::*;

    #[test]
    fn test_encode_requires_kind() {
        netd_cmd()
            .args(["link", "encode"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--kind"));
    }

    #[test]
    fn test_vrf_encode() {
        // IFLA_VRF_TABLE (1), u32 100, native endian.
        let expected = hex_attr_u32(1, 100);
        netd_cmd()
            .args(["link", "encode", "--kind", "vrf"])
            .write_stdin(r#"{"table": 100}"#)
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }

    #[test]
    fn test_vrf_decode() {
        netd_cmd()
            .args(["link", "decode", "--kind", "vrf", &hex_attr_u32(1, 100)])
            .assert()
            .success()
            .stdout(predicate::str::contains("100"));
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        netd_cmd()
            .args(["link", "decode", "--kind", "bridge", "zz"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not hex"));
    }

    #[test]
    fn test_unknown_kind() {
        netd_cmd()
            .args(["link", "encode", "--kind", "macvlan"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    fn hex_attr_u32(kind: u16, value: u32) -> String {
        let mut attr = Vec::new();
        attr.extend_from_slice(&8u16.to_ne_bytes());
        attr.extend_from_slice(&kind.to_ne_bytes());
        attr.extend_from_slice(&value.to_ne_bytes());
        attr.iter().map(|b| format!("{b:02x}")).collect()
    }
}

mod wg_command {
    use super::*;

    #[test]
    fn test_diff_help() {
        netd_cmd()
            .args(["wg", "diff", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--encode"));
    }

    #[test]
    fn test_diff_requires_both_specs() {
        netd_cmd()
            .args(["wg", "diff", "desired.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("EXISTING"));
    }
}

mod dhcp_commands {
    use super::*;

    #[test]
    fn test_dhcp4_requires_link() {
        netd_cmd()
            .arg("dhcp4")
            .assert()
            .failure()
            .stderr(predicate::str::contains("<LINK>"));
    }

    #[test]
    fn test_dhcp6_help() {
        netd_cmd()
            .args(["dhcp6", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--duid"));
    }

    #[test]
    fn test_dhcp4_unknown_link() {
        netd_cmd()
            .args(["dhcp4", "does-not-exist0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error"));
    }
}
