use common::address;
use store::{Membership, SqliteStore};

use crate::support::{deliver, harness};

fn create_list_a(store: &SqliteStore) -> store::List {
    let addr = address::parse("list_a@example.com").unwrap();
    let list = store.create(&addr, "A").unwrap();
    store
        .add_members(&list, &[address::parse("claire@example.com").unwrap()], Membership { receive: true, ..Default::default() })
        .unwrap();
    store
        .add_members(&list, &[address::parse("noemi@example.com").unwrap()], Membership { receive: false, ..Default::default() })
        .unwrap();
    store
        .add_members(&list, &[address::parse("norah@example.net").unwrap()], Membership { receive: true, ..Default::default() })
        .unwrap();
    list
}

#[tokio::test]
async fn fan_out_rewrites_headers_and_excludes_non_receivers() {
    let (ctx, sink, store) = harness();
    create_list_a(&store);

    let raw = b"From: chris@example.com\r\nTo: list_a@example.com\r\nSubject: foo\r\n\r\nHello";
    let (rcpt_responses, data_response) = deliver(ctx, "chris@example.com", &["list_a@example.com"], raw).await;

    assert!(rcpt_responses.iter().all(|r| r.starts_with("250")), "{rcpt_responses:?}");
    assert!(data_response.starts_with("250"), "{data_response}");

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.envelope_from, "list_a+bounces@example.com");
    assert_eq!(call.envelope_to, vec!["claire@example.com".to_string(), "norah@example.net".to_string()]);

    let header = String::from_utf8(call.header.clone()).unwrap();
    assert!(header.contains("From: \"chris via A\" <list_a@example.com>"), "{header}");
    assert!(header.contains("Reply-To: chris@example.com"), "{header}");
    assert!(header.contains("Subject: [A] foo"), "{header}");
    assert!(header.contains("List-Id: \"A\" <list_a@example.com>"), "{header}");

    let body = String::from_utf8(call.body.clone()).unwrap();
    assert!(body.starts_with("Hello\r\n\r\n----\r\n"), "{body}");
    assert!(body.contains("leave the mailing list"));
}

#[tokio::test]
async fn spam_header_spools_and_notifies_moderators() {
    let (ctx, sink, store) = harness();
    let list = create_list_a(&store);
    store.add_members(&list, &[address::parse("mod@example.com").unwrap()], Membership { notify: true, ..Default::default() }).unwrap();

    let raw = b"From: claire@example.com\r\nTo: list_a@example.com\r\nSubject: foo\r\nX-Spam-Status: Yes, score=12\r\n\r\nHello";
    let (_rcpt, data_response) = deliver(ctx.clone(), "claire@example.com", &["list_a@example.com"], raw).await;
    assert!(data_response.starts_with("250"), "{data_response}");

    let calls = sink.calls();
    assert_eq!(calls.len(), 1, "exactly one notify-moderators email, no list forward");
    assert_eq!(calls[0].envelope_to, vec!["mod@example.com".to_string()]);
    let subject_line = String::from_utf8(calls[0].header.clone()).unwrap();
    assert!(subject_line.contains("[A] A message needs moderation"), "{subject_line}");

    assert_eq!(ctx.spool.list(list.id).unwrap().len(), 1, "exactly one spooled message");
}

#[tokio::test]
async fn loop_guard_rejects_mail_already_carrying_the_lists_list_id() {
    let (ctx, sink, store) = harness();
    create_list_a(&store);

    let raw = b"From: chris@example.com\r\nTo: list_a@example.com\r\nSubject: foo\r\nList-Id: \"A\" <list_a@example.com>\r\n\r\nHello";
    let (_rcpt, data_response) = deliver(ctx, "chris@example.com", &["list_a@example.com"], raw).await;

    assert!(data_response.starts_with("554"), "{data_response}");
    assert!(data_response.contains("email loop detected"), "{data_response}");
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn list_address_only_in_bcc_is_rejected() {
    let (ctx, sink, store) = harness();
    create_list_a(&store);

    let raw = b"From: chris@example.com\r\nTo: other@example.com\r\nSubject: foo\r\n\r\nHello";
    let (_rcpt, data_response) = deliver(ctx, "chris@example.com", &["list_a@example.com"], raw).await;

    assert!(data_response.starts_with("541"), "{data_response}");
    assert!(data_response.contains("is not in To or Cc"), "{data_response}");
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn join_by_email_on_public_list_sends_checkback_without_changing_membership() {
    let (ctx, sink, store) = harness();
    let mut list = create_list_a(&store);
    list.public_signup = true;
    store.update(&list).unwrap();

    let raw = b"From: cleo@example.com\r\nTo: list_a@example.com\r\nSubject: join\r\n\r\n";
    let (_rcpt, data_response) = deliver(ctx.clone(), "cleo@example.com", &["list_a@example.com"], raw).await;
    assert!(data_response.starts_with("250"), "{data_response}");

    let membership = store.get_membership(list.id, &address::parse("cleo@example.com").unwrap()).unwrap();
    assert!(!membership.member, "join is not applied until the checkback link is confirmed");

    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].envelope_to, vec!["cleo@example.com".to_string()]);

    // A second identical request within the rate-limit window is rejected
    // with a user-visible, retryable error rather than a second email.
    let (_rcpt2, second_response) = deliver(ctx, "cleo@example.com", &["list_a@example.com"], raw).await;
    assert!(second_response.starts_with("451"), "{second_response}");
    assert_eq!(sink.calls().len(), 1, "rate-limited resubmission must not send a second checkback");
}

#[tokio::test]
async fn join_and_leave_give_the_same_response_regardless_of_current_membership() {
    // Membership-leak mitigation (spec §4.10/§7): a join from an existing
    // member, and a leave from a non-member, must both resolve with a plain
    // 250 and send no mail — the same outward response as a join from a
    // fresh address or a leave from a current member.
    let (ctx, sink, store) = harness();
    let mut list = create_list_a(&store);
    list.public_signup = true;
    store.update(&list).unwrap();

    let join_raw = b"From: claire@example.com\r\nTo: list_a@example.com\r\nSubject: join\r\n\r\n";
    let (_rcpt, join_response) = deliver(ctx.clone(), "claire@example.com", &["list_a@example.com"], join_raw).await;
    assert!(join_response.starts_with("250"), "{join_response}");
    assert!(sink.calls().is_empty(), "no checkback email for an already-joined address");

    let leave_raw = b"From: someone-else@example.com\r\nTo: list_a@example.com\r\nSubject: leave\r\n\r\n";
    let (_rcpt2, leave_response) = deliver(ctx, "someone-else@example.com", &["list_a@example.com"], leave_raw).await;
    assert!(leave_response.starts_with("250"), "{leave_response}");
    assert!(sink.calls().is_empty(), "no checkback email for an address that was never a member");
}

#[tokio::test]
async fn bounce_suffix_must_match_empty_envelope_from() {
    let (ctx, sink, store) = harness();
    create_list_a(&store);

    // A non-empty envelope-from paired with a bounce-suffixed recipient is
    // a protocol violation, rejected at RCPT TO time.
    let (rcpt_responses, _data) = deliver(ctx, "someone@example.com", &["list_a+bounces@example.com"], b"Subject: x\r\n\r\nbody").await;
    assert!(rcpt_responses[0].starts_with("541"), "{rcpt_responses:?}");
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn command_with_multiple_from_addresses_is_rejected_513() {
    let (ctx, sink, store) = harness();
    let mut list = create_list_a(&store);
    list.public_signup = true;
    store.update(&list).unwrap();

    let raw = b"From: a@example.com, b@example.com\r\nTo: list_a@example.com\r\nSubject: join\r\n\r\n";
    let (_rcpt, data_response) = deliver(ctx, "a@example.com", &["list_a@example.com"], raw).await;
    assert!(data_response.starts_with("513"), "{data_response}");
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn private_list_rejects_join_by_email_even_from_unknown_address() {
    let (ctx, sink, store) = harness();
    create_list_a(&store); // public_signup defaults to false

    let raw = b"From: stranger@example.com\r\nTo: list_a@example.com\r\nSubject: join\r\n\r\n";
    let (_rcpt, data_response) = deliver(ctx, "stranger@example.com", &["list_a@example.com"], raw).await;
    assert!(data_response.starts_with("554"), "{data_response}");
    assert!(sink.calls().is_empty());
}
