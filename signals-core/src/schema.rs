use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    device_profiles (identity) {
        identity -> Text,
        delivery_token -> Nullable<Text>,
        platform -> Text,
        app_version -> Text,
        last_active -> Timestamptz,
        created_at -> Timestamptz,
    }
}

table! {
    notifications (id) {
        id -> Uuid,
        kind -> Text,
        title -> Text,
        message -> Text,
        data -> Nullable<Jsonb>,
        target_user -> Nullable<Text>,
        status -> Text,
        view_count -> Integer,
        click_count -> Integer,
        clicked_user_ids -> Array<Text>,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

table! {
    notification_events (id) {
        id -> BigInt,
        user_identity -> Text,
        notification_id -> Uuid,
        event_type -> Text,
        event_time -> Timestamptz,
    }
}

table! {
    notification_clicks (id) {
        id -> BigInt,
        notification_id -> Uuid,
        user_identity -> Text,
        action -> Text,
        clicked_at -> Timestamptz,
        platform -> Text,
        deep_link -> Nullable<Text>,
    }
}

table! {
    notification_logs (id) {
        id -> BigInt,
        notification_id -> Uuid,
        status -> Text,
        result -> Jsonb,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    silent_notifications (id) {
        id -> BigInt,
        device_identity -> Text,
        handler_type -> Text,
        payload -> Jsonb,
        execution_time_ms -> BigInt,
        success -> Bool,
        result -> Jsonb,
        error_message -> Nullable<Text>,
        platform -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    signals (id) {
        id -> Uuid,
        pair -> Text,
        direction -> Text,
        entry_price -> Double,
        status -> Text,
        created_at -> Timestamptz,
    }
}

joinable!(notification_events -> notifications (notification_id));
joinable!(notification_clicks -> notifications (notification_id));
joinable!(notification_logs -> notifications (notification_id));

allow_tables_to_appear_in_same_query!(
    device_profiles,
    notifications,
    notification_events,
    notification_clicks,
    notification_logs,
    silent_notifications,
    signals,
);
