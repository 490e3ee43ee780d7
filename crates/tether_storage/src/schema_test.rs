use assert_matches::assert_matches;
use rstest::rstest;

use crate::errors::StorageError;
use crate::schema::validate_schema_name;

#[rstest]
#[case("public")]
#[case("_private")]
#[case("tenant_42$x")]
fn valid_schema_names_pass(#[case] name: &str) {
    validate_schema_name(name).unwrap();
}

#[rstest]
#[case("")]
#[case("Public")]
#[case("1tenant")]
#[case("te nant")]
#[case("drop;--")]
fn invalid_schema_names_are_rejected(#[case] name: &str) {
    assert_matches!(
        validate_schema_name(name),
        Err(StorageError::InvalidSchemaName(_))
    );
}
