//! End-to-end flow tests against a real on-disk SQLite database.
//!
//! These walk the same service-layer calls the handlers make, without a live
//! Telegram connection: provisioning, invitation issuance, registration
//! commit and catalog management.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tempfile::NamedTempFile;

use menubot::auth::Role;
use menubot::db::{self, Db, DishUpdate, NewDish};
use menubot::invites::{InviteTokenService, INVITE_TTL_SECONDS};
use menubot::kv::ExpiringStore;
use menubot::onboarding::{complete_registration, RegistrationOutcome};

fn setup() -> Result<(Db, InviteTokenService, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let conn = Connection::open(temp_file.path())?;
    db::init_database_schema(&conn)?;
    let db: Db = Arc::new(tokio::sync::Mutex::new(conn));
    let invites = InviteTokenService::new(ExpiringStore::new(Arc::clone(&db)));
    Ok((db, invites, temp_file))
}

#[tokio::test]
async fn admin_provisioning_from_restaurant_to_bound_admin() -> Result<()> {
    let (db, invites, _temp_file) = setup()?;

    // Superadmin provisions a restaurant and invites its admin
    let restaurant = {
        let conn = db.lock().await;
        db::create_restaurant(&conn, "North")?
    };
    let token = invites
        .issue(restaurant.id, Role::Admin, INVITE_TTL_SECONDS)
        .await?;

    // The invitee registers through the token
    let outcome =
        complete_registration(&db, &invites, &token, "200", Some("kim"), "Kim", "Park").await?;
    let admin = match outcome {
        RegistrationOutcome::Registered(user) => user,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(admin.role, Role::Admin);
    assert_eq!(admin.restaurant_id, Some(restaurant.id));

    // A second redemption of the same token is rejected
    let replay = complete_registration(&db, &invites, &token, "201", None, "Eve", "Imp").await?;
    assert!(matches!(replay, RegistrationOutcome::TokenInvalid));
    {
        let conn = db.lock().await;
        assert!(db::get_user_by_tg_id(&conn, "201")?.is_none());
    }

    Ok(())
}

#[tokio::test]
async fn catalog_management_create_then_edit_without_video() -> Result<()> {
    let (db, _invites, _temp_file) = setup()?;
    let conn = db.lock().await;

    let restaurant = db::create_restaurant(&conn, "North")?;
    let category = db::create_category(&conn, "Starters", restaurant.id)?;

    let dish = db::create_dish(
        &conn,
        &NewDish {
            name: "Soup".to_string(),
            category_id: category.id,
            restaurant_id: restaurant.id,
            composition: Some("pumpkin, cream".to_string()),
            description: Some("Autumn special".to_string()),
            cook_time: None,
            video_url: None,
            ingredients_photo_url: None,
            ready_photo_url: None,
        },
    )?;

    // Edit wizard ends with the video step declined
    let updated = db::update_dish_scoped(
        &conn,
        dish.id,
        restaurant.id,
        &DishUpdate {
            name: "Pumpkin Soup".to_string(),
            category_id: category.id,
            composition: Some("pumpkin, cream, nutmeg".to_string()),
            description: Some("Autumn special".to_string()),
            video_url: None,
        },
    )?;
    assert!(updated);

    let reloaded = db::get_dish_scoped(&conn, dish.id, restaurant.id)?.unwrap();
    assert_eq!(reloaded.name, "Pumpkin Soup");
    assert!(reloaded.video_url.is_none());
    assert!(reloaded.video_file_id.is_none());

    let listed = db::get_dishes_by_category(&conn, category.id, restaurant.id)?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Pumpkin Soup");

    Ok(())
}

#[tokio::test]
async fn waiter_invitation_lifecycle() -> Result<()> {
    let (db, invites, _temp_file) = setup()?;

    let restaurant = {
        let conn = db.lock().await;
        db::create_restaurant(&conn, "North")?
    };
    let token = invites
        .issue(restaurant.id, Role::Waiter, INVITE_TTL_SECONDS)
        .await?;

    // Token is live until redeemed
    let invite = invites.resolve(&token).await?.unwrap();
    assert_eq!(invite.role, Role::Waiter);
    assert_eq!(invite.restaurant_id, restaurant.id);

    let outcome =
        complete_registration(&db, &invites, &token, "300", Some("ann"), "Ann", "Lee").await?;
    let waiter = match outcome {
        RegistrationOutcome::Registered(user) => user,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(waiter.role, Role::Waiter);
    assert_eq!(waiter.restaurant_id, Some(restaurant.id));

    // Redemption retires the token
    assert!(invites.resolve(&token).await?.is_none());

    // The new waiter shows up in the staff listing
    let conn = db.lock().await;
    let staff = db::get_waiters_by_restaurant(&conn, restaurant.id)?;
    assert_eq!(staff.len(), 1);
    assert_eq!(staff[0].first_name, "Ann");

    Ok(())
}

#[tokio::test]
async fn tenant_isolation_across_restaurants() -> Result<()> {
    let (db, _invites, _temp_file) = setup()?;
    let conn = db.lock().await;

    let north = db::create_restaurant(&conn, "North")?;
    let south = db::create_restaurant(&conn, "South")?;
    let north_cat = db::create_category(&conn, "Starters", north.id)?;
    let north_dish = db::create_dish(
        &conn,
        &NewDish {
            name: "Soup".to_string(),
            category_id: north_cat.id,
            restaurant_id: north.id,
            composition: None,
            description: None,
            cook_time: None,
            video_url: None,
            ingredients_photo_url: None,
            ready_photo_url: None,
        },
    )?;

    // Reads and writes scoped to the wrong restaurant behave as if the
    // entity did not exist
    assert!(db::get_dish_scoped(&conn, north_dish.id, south.id)?.is_none());
    assert!(!db::delete_dish_scoped(&conn, north_dish.id, south.id)?);
    assert!(!db::rename_category_scoped(&conn, north_cat.id, south.id, "Mains")?);

    // And nothing was modified
    let intact = db::get_dish_scoped(&conn, north_dish.id, north.id)?.unwrap();
    assert_eq!(intact.name, "Soup");
    let cat = db::get_category_scoped(&conn, north_cat.id, north.id)?.unwrap();
    assert_eq!(cat.name, "Starters");

    Ok(())
}

#[tokio::test]
async fn superadmin_is_provisioned_not_invited() -> Result<()> {
    let (db, invites, _temp_file) = setup()?;

    let restaurant = {
        let conn = db.lock().await;
        db::create_restaurant(&conn, "North")?
    };
    assert!(invites
        .issue(restaurant.id, Role::Superadmin, INVITE_TTL_SECONDS)
        .await
        .is_err());

    // Bootstrap path used at process start
    let conn = db.lock().await;
    let boss = db::create_user_if_absent(&conn, "Super", "Admin", None, "1", Role::Superadmin, None)?;
    assert_eq!(boss.unwrap().role, Role::Superadmin);

    // Idempotent across restarts
    assert!(db::create_user_if_absent(&conn, "Super", "Admin", None, "1", Role::Superadmin, None)?
        .is_none());

    Ok(())
}
