//! Static lookup tables for native constants.

use uuid::Uuid;

fn lookup(table: &[(u32, &'static str)], value: u32) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map_or("UNKNOWN", |(_, name)| *name)
}

static SERVICE_TYPES: &[(u32, &str)] = &[
    (0x1, "KERNEL_DRIVER"),
    (0x2, "FILE_SYSTEM_DRIVER"),
    (0x4, "ADAPTER"),
    (0x8, "RECOGNIZER_DRIVER"),
    (0x10, "WIN32_OWN_PROCESS"),
    (0x20, "WIN32_SHARE_PROCESS"),
    (0x50, "USER_OWN_PROCESS"),
    (0x60, "USER_SHARE_PROCESS"),
    (0xD0, "USER_OWN_PROCESS_INSTANCE"),
    (0xE0, "USER_SHARE_PROCESS_INSTANCE"),
    (0x110, "WIN32_OWN_PROCESS_INTERACTIVE"),
    (0x120, "WIN32_SHARE_PROCESS_INTERACTIVE"),
];

static START_TYPES: &[(u32, &str)] = &[
    (0, "BOOT_START"),
    (1, "SYSTEM_START"),
    (2, "AUTO_START"),
    (3, "DEMAND_START"),
    (4, "DISABLED"),
];

static ERROR_CONTROLS: &[(u32, &str)] = &[
    (0, "IGNORE"),
    (1, "NORMAL"),
    (2, "SEVERE"),
    (3, "CRITICAL"),
];

static SERVICE_STATES: &[(u32, &str)] = &[
    (1, "STOPPED"),
    (2, "START_PENDING"),
    (3, "STOP_PENDING"),
    (4, "RUNNING"),
    (5, "CONTINUE_PENDING"),
    (6, "PAUSE_PENDING"),
    (7, "PAUSED"),
];

static SID_TYPES: &[(u32, &str)] = &[(0, "NONE"), (1, "UNRESTRICTED"), (3, "RESTRICTED")];

static ACTION_TYPES: &[(u32, &str)] = &[
    (0, "NONE"),
    (1, "RESTART"),
    (2, "REBOOT"),
    (3, "RUN_COMMAND"),
];

static TRIGGER_TYPES: &[(u32, &str)] = &[
    (1, "DEVICE_INTERFACE_ARRIVAL"),
    (2, "IP_ADDRESS_AVAILABILITY"),
    (3, "DOMAIN_JOIN"),
    (4, "FIREWALL_PORT_EVENT"),
    (5, "GROUP_POLICY"),
    (6, "NETWORK_ENDPOINT"),
    (7, "CUSTOM_SYSTEM_STATE_CHANGE"),
    (20, "CUSTOM"),
    (30, "AGGREGATE"),
];

static TRIGGER_ACTIONS: &[(u32, &str)] = &[(1, "SERVICE_START"), (2, "SERVICE_STOP")];

static DATA_TYPES: &[(u32, &str)] = &[
    (1, "BINARY"),
    (2, "STRING"),
    (3, "LEVEL"),
    (4, "KEYWORD_ANY"),
    (5, "KEYWORD_ALL"),
];

static LAUNCH_PROTECTION: &[(u32, &str)] = &[
    (0, "NONE"),
    (1, "WINDOWS"),
    (2, "WINDOWS_LIGHT"),
    (3, "ANTIMALWARE_LIGHT"),
];

pub fn service_type(value: u32) -> &'static str {
    lookup(SERVICE_TYPES, value)
}

pub fn start_type(value: u32) -> &'static str {
    lookup(START_TYPES, value)
}

pub fn error_control(value: u32) -> &'static str {
    lookup(ERROR_CONTROLS, value)
}

pub fn service_state(value: u32) -> &'static str {
    lookup(SERVICE_STATES, value)
}

pub fn sid_type(value: u32) -> &'static str {
    lookup(SID_TYPES, value)
}

pub fn action_type(value: u32) -> &'static str {
    lookup(ACTION_TYPES, value)
}

pub fn trigger_type(value: u32) -> &'static str {
    lookup(TRIGGER_TYPES, value)
}

pub fn trigger_action(value: u32) -> &'static str {
    lookup(TRIGGER_ACTIONS, value)
}

pub fn data_type(value: u32) -> &'static str {
    lookup(DATA_TYPES, value)
}

pub fn launch_protection(value: u32) -> &'static str {
    lookup(LAUNCH_PROTECTION, value)
}

/// Known folder name (case-insensitive) to its folder ID.
pub fn known_folder(name: &str) -> Option<Uuid> {
    KNOWN_FOLDERS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, g)| *g)
}

pub fn known_folder_name(id: &Uuid) -> Option<&'static str> {
    KNOWN_FOLDERS.iter().find(|(_, g)| g == id).map(|(n, _)| *n)
}

pub fn trigger_subtype(id: &Uuid) -> Option<&'static str> {
    TRIGGER_SUBTYPES.iter().find(|(g, _)| g == id).map(|(_, n)| *n)
}

pub static KNOWN_FOLDERS: &[(&str, Uuid)] = &[
    ("Desktop", Uuid::from_u128(0xB4BF_CC3A_DB2C_424C_B029_7FE9_9A87_C641)),
    ("Documents", Uuid::from_u128(0xFDD3_9AD0_238F_46AF_ADB4_6C85_4803_69C7)),
    ("Downloads", Uuid::from_u128(0x374D_E290_123F_4565_9164_39C4_925E_467B)),
    ("Music", Uuid::from_u128(0x4BD8_D571_6D19_48D3_BE97_4222_2008_0E43)),
    ("Pictures", Uuid::from_u128(0x33E2_8130_4E1E_4676_835A_9839_5C3B_C3BB)),
    ("Videos", Uuid::from_u128(0x1898_9B1D_99B5_455B_841C_AB7C_74E4_DDFC)),
    ("Favorites", Uuid::from_u128(0x1777_F761_68AD_4D8A_87BD_30B7_59FA_33DD)),
    ("Links", Uuid::from_u128(0xBFB9_D5E0_C6A9_404C_B2B2_AE6D_B6AF_4968)),
    ("Contacts", Uuid::from_u128(0x5678_4854_C6CB_462B_8169_88E3_50AC_B882)),
    ("Searches", Uuid::from_u128(0x7D1D_3A04_DEBB_4115_95CF_2F29_DA29_20DA)),
    ("SavedGames", Uuid::from_u128(0x4C5C_32FF_BB9D_43B0_B5B4_2D72_E54E_AAA4)),
    ("Profile", Uuid::from_u128(0x5E6C_858F_0E22_4760_9AFE_EA33_17B6_7173)),
    ("RoamingAppData", Uuid::from_u128(0x3EB6_85DB_65F9_4CF6_A03A_E3EF_6572_9F3D)),
    ("LocalAppData", Uuid::from_u128(0xF1B3_2785_6FBA_4FCF_9D55_7B8E_7F15_7091)),
    ("LocalAppDataLow", Uuid::from_u128(0xA520_A1A4_1780_4FF6_BD18_1673_43C5_AF16)),
    ("Recent", Uuid::from_u128(0xAE50_C081_EBD2_438A_8655_8A09_2E34_987A)),
    ("SendTo", Uuid::from_u128(0x8983_036C_27C0_404B_8F08_102D_10DC_FD74)),
    ("StartMenu", Uuid::from_u128(0x625B_53C3_AB48_4EC1_BA1F_A1EF_4146_FC19)),
    ("Programs", Uuid::from_u128(0xA77F_5D77_2E2B_44C3_A6A2_ABA6_0105_4A51)),
    ("Startup", Uuid::from_u128(0xB97D_20BB_F46A_4C97_BA10_5E36_0843_0854)),
    ("Templates", Uuid::from_u128(0xA632_93E8_664E_48DB_A079_DF75_9E05_09F7)),
    ("Cookies", Uuid::from_u128(0x2B0F_765D_C0E9_4171_908E_08A6_11B8_4FF6)),
    ("History", Uuid::from_u128(0xD9DC_8A3B_B784_432E_A781_5A11_30A7_5963)),
    ("InternetCache", Uuid::from_u128(0x3524_81E8_33BE_4251_BA85_6007_CAED_CF9D)),
    ("NetHood", Uuid::from_u128(0xC5AB_BF53_E17F_4121_8900_8662_6FC2_C973)),
    ("AdminTools", Uuid::from_u128(0x724E_F170_A42D_4FEF_9F26_B60E_846F_BA4F)),
    ("ProgramData", Uuid::from_u128(0x62AB_5D82_FDC1_4DC3_A9DD_070D_1D49_5D97)),
    ("ProgramFiles", Uuid::from_u128(0x905E_63B6_C1BF_494E_B29C_65B7_32D3_D21A)),
    ("ProgramFilesX86", Uuid::from_u128(0x7C5A_40EF_A0FB_4BFC_874A_C0F2_E0B9_FA8E)),
    ("ProgramFilesCommon", Uuid::from_u128(0xF7F1_ED05_9F6D_47A2_AAAE_29D3_17C6_F066)),
    ("ProgramFilesCommonX86", Uuid::from_u128(0xDE97_4D24_D9C6_4D3E_BF91_F445_5120_B917)),
    ("Windows", Uuid::from_u128(0xF38B_F404_1D43_42F2_9305_67DE_0B28_FC23)),
    ("System", Uuid::from_u128(0x1AC1_4E77_02E7_4E5D_B744_2EB1_AE51_98B7)),
    ("SystemX86", Uuid::from_u128(0xD652_31B0_B2F1_4857_A4CE_A8E7_C6EA_7D27)),
    ("Fonts", Uuid::from_u128(0xFD22_8CB7_AE11_4AE3_864C_16F3_910A_B8FE)),
    ("ResourceDir", Uuid::from_u128(0x8AD1_0C31_2ADB_4296_A8F7_E470_1232_C972)),
    ("UserProfiles", Uuid::from_u128(0x0762_D272_C50A_4BB0_A382_697D_CD72_9B80)),
    ("Public", Uuid::from_u128(0xDFDF_76A2_C82A_4D63_906A_5644_AC45_7385)),
    ("PublicDesktop", Uuid::from_u128(0xC4AA_340D_F20F_4863_AFEF_F87E_F2E6_BA25)),
    ("PublicDocuments", Uuid::from_u128(0xED48_24AF_DCE4_45A8_81E2_FC79_6508_3634)),
    ("CommonStartMenu", Uuid::from_u128(0xA411_5719_D62E_491D_AA7C_E74B_8BE3_B067)),
    ("CommonPrograms", Uuid::from_u128(0x0139_D44E_6AFE_49F2_8690_3DAF_CAE6_FFB8)),
    ("CommonStartup", Uuid::from_u128(0x82A5_EA35_D9CD_47C5_9629_E15D_2F71_4E6E)),
    ("CommonTemplates", Uuid::from_u128(0xB942_37E7_57AC_4347_9151_B08C_6C32_D1F7)),
];

static TRIGGER_SUBTYPES: &[(Uuid, &str)] = &[
    (Uuid::from_u128(0x4F27_F2DE_14E2_430B_A549_7CD4_8CBC_8245), "FIRST_IP_ADDRESS_ARRIVAL"),
    (Uuid::from_u128(0xCC4B_A62A_162E_4648_847A_B6BD_F993_E335), "LAST_IP_ADDRESS_REMOVAL"),
    (Uuid::from_u128(0x1CE2_0ABA_9851_4421_9430_1DDE_B766_E809), "DOMAIN_JOIN"),
    (Uuid::from_u128(0xDDAF_516E_58C2_4866_9574_C3B6_15D4_2EA1), "DOMAIN_LEAVE"),
    (Uuid::from_u128(0xB756_9E07_8421_4EE0_AD10_8691_5AFD_AD09), "FIREWALL_PORT_OPEN"),
    (Uuid::from_u128(0xA144_ED38_8E12_4DE4_9D96_E647_40B1_A524), "FIREWALL_PORT_CLOSE"),
    (Uuid::from_u128(0x659F_CAE6_5BDB_4DA9_B1FF_CA2A_178D_46E0), "MACHINE_POLICY_PRESENT"),
    (Uuid::from_u128(0x54FB_46C8_F089_464C_B1FD_59D1_B62C_3B50), "USER_POLICY_PRESENT"),
    (Uuid::from_u128(0xBC90_D167_9470_4139_A9BA_BE0B_BBF5_B74D), "RPC_INTERFACE_EVENT"),
    (Uuid::from_u128(0x1F81_D131_3FAC_4537_9E0C_7E7B_0C2F_4B55), "NAMED_PIPE_EVENT"),
];

#[cfg(test)]
mod tests {
    use super::{
        KNOWN_FOLDERS, known_folder, known_folder_name, service_state, start_type,
        trigger_subtype,
    };
    use uuid::Uuid;

    use crate::guid;

    #[test]
    fn folder_lookup_is_case_insensitive() {
        let docs = known_folder("documents");
        assert_eq!(docs, guid::parse("FDD39AD0-238F-46AF-ADB4-6C85480369C7"));
        assert_eq!(docs.as_ref().and_then(known_folder_name), Some("Documents"));
        assert_eq!(known_folder("NoSuchFolder"), None);
    }

    #[test]
    fn folder_table_has_unique_names_and_ids() {
        for (i, (name, id)) in KNOWN_FOLDERS.iter().enumerate() {
            for (other_name, other_id) in &KNOWN_FOLDERS[i + 1..] {
                assert!(!name.eq_ignore_ascii_case(other_name), "{name}");
                assert_ne!(id, other_id, "{name} / {other_name}");
            }
        }
    }

    #[test]
    fn trigger_subtypes_resolve_by_guid() {
        let g = guid::parse("{4F27F2DE-14E2-430B-A549-7CD48CBC8245}");
        assert_eq!(g.as_ref().and_then(trigger_subtype), Some("FIRST_IP_ADDRESS_ARRIVAL"));
        assert_eq!(trigger_subtype(&Uuid::from_u128(1)), None);
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(service_state(4), "RUNNING");
        assert_eq!(start_type(2), "AUTO_START");
        assert_eq!(service_state(99), "UNKNOWN");
    }
}
