use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use hm_common::clock::FixedClock;
use hm_common::index::{InMemoryIndex, InMemoryStore};
use hm_common::mapping::SimplifyConfig;
use hm_common::reference::{ReferenceBundle, ReferenceData};
use hm_common::search::{
    count_companies, run_search, HiringType, SearchContext, SearchCriteriaBuilder, SearchError,
    SearchSettings, SortMode,
};
use hm_common::{Company, CompanyScoreEntry, GeoPoint};

const METZ: (f64, f64) = (49.119, 6.176);

const BUNDLE: &str = r#"{
    "occupations": { "D1101": "Boucherie", "D1106": "Vente en alimentation" },
    "industries": { "4711D": "Supermarchés", "4722Z": "Commerce de détail de viandes" },
    "pairs": [
        { "occupation_code": "D1101", "industry_code": "4722Z", "weight": 120.0 },
        { "occupation_code": "D1101", "industry_code": "4711D", "weight": 40.0 },
        { "occupation_code": "D1106", "industry_code": "4711D", "weight": 300.0 }
    ],
    "contact_modes": [
        { "industry_prefix": "47", "occupation_code": "D1101", "mode": "Se présenter spontanément" }
    ]
}"#;

fn reference() -> ReferenceData {
    let bundle = ReferenceBundle::from_json_str(BUNDLE).unwrap();
    ReferenceData::from_bundle(bundle, None, &SimplifyConfig::default()).unwrap()
}

fn clock() -> FixedClock {
    FixedClock(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
}

/// Company `km_north` kilometres north of Metz scoring `score` for D1101.
fn entry(siret: &str, km_north: f64, score: f64) -> CompanyScoreEntry {
    CompanyScoreEntry {
        siret: siret.into(),
        industry_code: "4722Z".into(),
        size_code: 3,
        location: Some(GeoPoint::new(METZ.0 + km_north / 111.2, METZ.1)),
        department: "57".into(),
        score: 70,
        apprenticeship_score: 0,
        occupation_scores: BTreeMap::from([("D1101".to_string(), score)]),
        ..CompanyScoreEntry::default()
    }
}

fn company(entry: &CompanyScoreEntry) -> Company {
    Company {
        siret: entry.siret.clone(),
        name: format!("Boucherie {}", entry.siret),
        industry_code: entry.industry_code.clone(),
        size_code: entry.size_code,
        city: "Metz".into(),
        zipcode: "57000".into(),
        department: entry.department.clone(),
        location: entry.location,
        ..Company::default()
    }
}

fn fixture(entries: Vec<CompanyScoreEntry>) -> (InMemoryIndex, InMemoryStore) {
    let store = InMemoryStore::new(entries.iter().map(company));
    (InMemoryIndex::new(entries), store)
}

#[tokio::test]
async fn only_companies_within_radius_are_returned() {
    let settings = SearchSettings::default();
    let reference = reference();
    let (index, store) = fixture(vec![
        entry("00000000000001", 2.0, 60.0),
        entry("00000000000002", 5.0, 45.0),
        entry("00000000000003", 9.0, 80.0),
        entry("00000000000004", 15.0, 90.0),
        entry("00000000000005", 40.0, 95.0),
    ]);
    let criteria = SearchCriteriaBuilder::new(&settings, &reference)
        .occupation_codes(["D1101"])
        .origin(METZ.0, METZ.1)
        .distance_km(10)
        .build()
        .unwrap();
    let ctx = SearchContext {
        index: &index,
        store: &store,
        reference: &reference,
    };

    let outcome = run_search(criteria, &settings, &clock(), &ctx).await.unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.companies.len(), 3);
    for ranked in &outcome.companies {
        let distance = ranked.distance_km.unwrap();
        assert!(distance <= 10.0, "{} is {distance} km away", ranked.company.siret);
        assert_eq!(ranked.matched_occupation.as_deref(), Some("D1101"));
        assert_eq!(ranked.contact_mode, "Se présenter spontanément");
        assert_eq!(ranked.industry_label.as_deref(), Some("Commerce de détail de viandes"));
    }
    let positions: Vec<usize> = outcome.companies.iter().map(|c| c.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
}

#[tokio::test]
async fn blended_sort_favours_high_scores_for_a_fixed_day() {
    let settings = SearchSettings::default();
    let reference = reference();
    let (index, store) = fixture(vec![entry("00000000000001", 3.0, 100.0), entry("00000000000002", 3.0, 20.0)]);
    let ctx = SearchContext {
        index: &index,
        store: &store,
        reference: &reference,
    };

    let mut orders = Vec::new();
    for _ in 0..3 {
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .sort(SortMode::Blended)
            .build()
            .unwrap();
        let outcome = run_search(criteria, &settings, &clock(), &ctx).await.unwrap();
        orders.push(
            outcome
                .companies
                .iter()
                .map(|c| c.company.siret.clone())
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(orders[0], vec!["00000000000001", "00000000000002"]);
    assert!(orders.iter().all(|order| order == &orders[0]));
}

#[tokio::test]
async fn blended_sort_favours_high_scores_across_days() {
    let settings = SearchSettings::default();
    let reference = reference();
    let (index, store) = fixture(vec![entry("00000000000001", 3.0, 100.0), entry("00000000000002", 3.0, 20.0)]);
    let ctx = SearchContext {
        index: &index,
        store: &store,
        reference: &reference,
    };
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

    let days = 200;
    let mut wins = 0;
    for offset in 0..days {
        let day = FixedClock(start.checked_add_days(Days::new(offset)).unwrap());
        let criteria = SearchCriteriaBuilder::new(&settings, &reference)
            .occupation_codes(["D1101"])
            .origin(METZ.0, METZ.1)
            .sort(SortMode::Blended)
            .build()
            .unwrap();
        let outcome = run_search(criteria, &settings, &day, &ctx).await.unwrap();
        assert_eq!(outcome.companies.len(), 2);
        if outcome.companies[0].company.siret == "00000000000001" {
            wins += 1;
        }
    }

    // 100 * u1 loses to 20 * u2 about one day in ten.
    assert!(wins > days * 3 / 4, "top score led on only {wins} of {days} days");
    assert!(wins < days, "the daily shuffle never reordered the results");
}

#[tokio::test]
async fn boosted_company_outranks_better_scores() {
    let settings = SearchSettings::default();
    let reference = reference();
    let mut boosted = entry("00000000000002", 6.0, 10.0);
    boosted.boosted_occupations.insert("D1101".into());
    let (index, store) = fixture(vec![entry("00000000000001", 1.0, 100.0), boosted]);
    let criteria = SearchCriteriaBuilder::new(&settings, &reference)
        .occupation_codes(["D1101"])
        .origin(METZ.0, METZ.1)
        .sort(SortMode::Score)
        .build()
        .unwrap();

    let outcome = run_search(
        criteria,
        &settings,
        &clock(),
        &SearchContext {
            index: &index,
            store: &store,
            reference: &reference,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.companies[0].company.siret, "00000000000002");
    assert!(outcome.companies[0].boosted);
    assert!(!outcome.companies[1].boosted);
}

#[tokio::test]
async fn department_search_without_coordinates() {
    let settings = SearchSettings::default();
    let reference = reference();
    let mut elsewhere = entry("00000000000003", 2.0, 70.0);
    elsewhere.department = "54".into();
    let (index, store) = fixture(vec![
        entry("00000000000001", 100.0, 30.0),
        entry("00000000000002", 200.0, 60.0),
        elsewhere,
    ]);
    let criteria = SearchCriteriaBuilder::new(&settings, &reference)
        .occupation_codes(["d1101"])
        .departments(["57"])
        .sort(SortMode::Score)
        .build()
        .unwrap();

    let outcome = run_search(
        criteria,
        &settings,
        &clock(),
        &SearchContext {
            index: &index,
            store: &store,
            reference: &reference,
        },
    )
    .await
    .unwrap();

    let sirets: Vec<&str> = outcome.companies.iter().map(|c| c.company.siret.as_str()).collect();
    assert_eq!(sirets, vec!["00000000000002", "00000000000001"]);
    assert!(outcome.companies.iter().all(|c| c.distance_km.is_none()));
}

#[tokio::test]
async fn apprenticeship_context_uses_its_own_scores() {
    let settings = SearchSettings::default();
    let reference = reference();
    let mut apprentice = entry("00000000000001", 2.0, 50.0);
    apprentice.apprenticeship_score = 60;
    apprentice.apprenticeship_occupation_scores = BTreeMap::from([("D1101".to_string(), 60.0)]);
    let (index, store) = fixture(vec![apprentice, entry("00000000000002", 2.0, 90.0)]);
    let criteria = SearchCriteriaBuilder::new(&settings, &reference)
        .occupation_codes(["D1101"])
        .origin(METZ.0, METZ.1)
        .hiring_type(HiringType::Apprenticeship)
        .build()
        .unwrap();

    assert_eq!(count_companies(criteria.clone(), &settings, &clock(), &index).await.unwrap(), 1);

    let outcome = run_search(
        criteria,
        &settings,
        &clock(),
        &SearchContext {
            index: &index,
            store: &store,
            reference: &reference,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.companies.len(), 1);
    assert_eq!(outcome.companies[0].score, 60);
    assert_eq!(outcome.companies[0].stars, 3.0);
}

#[tokio::test]
async fn diverged_stores_fail_loudly() {
    let settings = SearchSettings::default();
    let reference = reference();
    let entries = vec![entry("00000000000001", 2.0, 50.0), entry("00000000000002", 3.0, 50.0)];
    let index = InMemoryIndex::new(entries.clone());
    let store = InMemoryStore::new([company(&entries[0])]);
    let criteria = SearchCriteriaBuilder::new(&settings, &reference)
        .occupation_codes(["D1101"])
        .origin(METZ.0, METZ.1)
        .build()
        .unwrap();

    let err = run_search(
        criteria,
        &settings,
        &clock(),
        &SearchContext {
            index: &index,
            store: &store,
            reference: &reference,
        },
    )
    .await
    .unwrap_err();

    match err {
        SearchError::DataConsistency { missing } => assert_eq!(missing, vec!["00000000000002".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }
}
