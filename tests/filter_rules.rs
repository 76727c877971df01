use chrono::{TimeZone, Utc};
use sentiment_fetcher::config::Target;
use sentiment_fetcher::ingest::filter::effective_text;
use sentiment_fetcher::ingest::providers::twitter::parse_search_body;
use sentiment_fetcher::ingest::types::{Author, RawPost, Retweeted};
use sentiment_fetcher::ingest::{classify, Decision, RejectReason};

fn target() -> Target {
    Target::new("pablo_casado", "Pablo Casado", "pablocasado_")
}

fn post(text: &str) -> RawPost {
    let t = Utc.with_ymd_and_hms(2020, 7, 18, 14, 8, 3).unwrap();
    RawPost {
        id: 42,
        author: Author {
            handle: "alguien".into(),
            followers_count: 1,
            favourites_count: 1,
            friends_count: 1,
            statuses_count: 1,
            created_at: t,
        },
        created_at: t,
        full_text: text.into(),
        retweeted: None,
        in_reply_to: None,
    }
}

#[test]
fn retweet_of_target_is_accepted_as_retweet() {
    let mut p = post("RT @pablocasado_: España necesita…");
    p.retweeted = Some(Retweeted {
        author_handle: "pablocasado_".into(),
        full_text: "España necesita un Gobierno que mire al futuro. @a @b @c".into(),
    });
    assert_eq!(classify(&p, &target()), Decision::Accept { is_retweet: true });

    let (text, is_rt) = effective_text(&p);
    assert!(is_rt);
    assert_eq!(
        text,
        "RT @pablocasado_ España necesita un Gobierno que mire al futuro. @a @b @c"
    );
}

#[test]
fn unrelated_leading_mention_is_rejected() {
    let p = post("@someone_else qué opinas de esto");
    assert_eq!(
        classify(&p, &target()),
        Decision::Reject(RejectReason::AmbiguousLeadingMention)
    );

    let mut reply = post("@someone_else @pablocasado_ qué opinas");
    reply.in_reply_to = Some("someone_else".into());
    assert_eq!(
        classify(&reply, &target()),
        Decision::Reject(RejectReason::AmbiguousLeadingMention)
    );
}

#[test]
fn account_match_is_case_sensitive() {
    let p = post("@PabloCasado_ hola");
    assert_eq!(
        classify(&p, &target()),
        Decision::Reject(RejectReason::AmbiguousLeadingMention)
    );
}

#[test]
fn retweet_of_someone_else_with_many_mentions_is_noise() {
    let mut p = post("RT @otro: ...");
    p.retweeted = Some(Retweeted {
        author_handle: "otro".into(),
        full_text: "hablando de @pablocasado_ y @InesArrimadas".into(),
    });
    // "RT @otro ... @pablocasado_ ... @InesArrimadas" has three '@'.
    assert_eq!(
        classify(&p, &target()),
        Decision::Reject(RejectReason::TooManyMentions)
    );
}

#[test]
fn fixture_page_classifies_as_expected() {
    let (posts, _) = parse_search_body(include_str!("fixtures/search_tweets.json")).unwrap();
    let decisions: Vec<Decision> = posts.iter().map(|p| classify(p, &target())).collect();
    assert_eq!(
        decisions,
        vec![
            Decision::Accept { is_retweet: false },
            Decision::Accept { is_retweet: true },
            Decision::Reject(RejectReason::AmbiguousLeadingMention),
            Decision::Reject(RejectReason::TooManyMentions),
        ]
    );
}

#[test]
fn classify_is_deterministic() {
    let samples = [
        "@pablocasado_ hola",
        "hola @a @b @c",
        "@x hola",
        "texto sin menciones",
    ];
    for s in samples {
        let p = post(s);
        let first = classify(&p, &target());
        for _ in 0..5 {
            assert_eq!(classify(&p, &target()), first);
        }
    }
}
