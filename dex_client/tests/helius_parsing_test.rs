use chrono::{TimeZone, Utc};
use dex_client::helius_client::{page_from_raw, HeliusTransaction};
use rust_decimal_macros::dec;

const SOL: &str = "So11111111111111111111111111111111111111112";
const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";

fn sample_page() -> String {
    format!(
        r#"[
        {{
            "signature": "sig-newest",
            "timestamp": 1704153600,
            "slot": 240000000,
            "type": "SWAP",
            "source": "JUPITER",
            "description": "swapped 0.5 SOL for 1000000 BONK",
            "fee": 5000,
            "feePayer": "{wallet}",
            "nativeTransfers": [],
            "accountData": [],
            "tokenTransfers": [
                {{
                    "fromUserAccount": "{wallet}",
                    "toUserAccount": "pool",
                    "fromTokenAccount": "a",
                    "toTokenAccount": "b",
                    "tokenAmount": 0.5,
                    "mint": "{sol}",
                    "tokenStandard": "Fungible"
                }},
                {{
                    "fromUserAccount": "pool",
                    "toUserAccount": "{wallet}",
                    "fromTokenAccount": "c",
                    "toTokenAccount": "d",
                    "tokenAmount": 1000000,
                    "mint": "{bonk}",
                    "tokenStandard": "Fungible"
                }}
            ]
        }},
        {{
            "signature": "sig-transfer",
            "timestamp": 1704067300,
            "type": "TRANSFER",
            "source": "SYSTEM_PROGRAM",
            "description": "",
            "fee": 5000,
            "feePayer": "{wallet}",
            "tokenTransfers": []
        }},
        {{
            "signature": "sig-oldest-bad-fee",
            "timestamp": 1704067200,
            "type": "SWAP",
            "source": "RAYDIUM",
            "description": "",
            "fee": -1,
            "feePayer": "{wallet}",
            "tokenTransfers": []
        }}
    ]"#,
        wallet = WALLET,
        sol = SOL,
        bonk = BONK
    )
}

#[test]
fn test_page_conversion_keeps_raw_cursor_and_horizon() {
    let raw: Vec<HeliusTransaction> = serde_json::from_str(&sample_page()).unwrap();
    let page = page_from_raw(raw);

    // The invalid oldest item is dropped but still anchors the cursor
    assert_eq!(page.cursor.as_deref(), Some("sig-oldest-bad-fee"));
    assert_eq!(
        page.oldest_timestamp,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(page.rejected, 1);
    assert_eq!(page.events.len(), 2);
    assert!(!page.is_empty());
}

#[test]
fn test_swap_event_legs_are_decimal_ui_amounts() {
    let raw: Vec<HeliusTransaction> = serde_json::from_str(&sample_page()).unwrap();
    let page = page_from_raw(raw);
    let swap = &page.events[0];

    assert_eq!(swap.signature, "sig-newest");
    assert!(swap.is_classifiable());
    assert_eq!(swap.fee_lamports, 5000);
    assert_eq!(swap.legs[0].mint, SOL);
    assert_eq!(swap.legs[0].amount, dec!(0.5));
    assert_eq!(swap.legs[0].from_user_account.as_deref(), Some(WALLET));
    assert_eq!(swap.legs[1].amount, dec!(1000000));

    assert!(!page.events[1].is_classifiable());
}

#[test]
fn test_empty_page() {
    let page = page_from_raw(Vec::new());
    assert!(page.is_empty());
    assert!(page.events.is_empty());
    assert_eq!(page.oldest_timestamp, None);
}
