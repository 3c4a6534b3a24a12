diesel::table! {
    agents (id) {
        id -> Uuid,
        owner_user_id -> Uuid,
        name -> Varchar,
        system_instructions -> Text,
        model -> Varchar,
        fallback_model -> Nullable<Varchar>,
        temperature -> Float8,
        max_tokens -> Int4,
        retrieval_mode -> Varchar,
        general_collection -> Varchar,
        learned_collection -> Varchar,
        min_score -> Float8,
        learned_min_score -> Float8,
        require_validation -> Bool,
        answer_below_threshold -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    chat_sessions (id) {
        id -> Uuid,
        public_id -> Uuid,
        agent_id -> Uuid,
        user_name -> Nullable<Varchar>,
        user_email -> Nullable<Varchar>,
        status -> Varchar,
        escalation_reason -> Varchar,
        assigned_support_agent -> Nullable<Uuid>,
        message_count -> Int4,
        started_at -> Timestamptz,
        escalated_at -> Nullable<Timestamptz>,
        assigned_at -> Nullable<Timestamptz>,
        resolved_at -> Nullable<Timestamptz>,
        resolved_by -> Nullable<Uuid>,
        resolution_type -> Nullable<Varchar>,
    }
}

diesel::table! {
    chat_messages (id) {
        id -> Uuid,
        session_id -> Uuid,
        role -> Varchar,
        content -> Text,
        corrected_content -> Nullable<Text>,
        validation_status -> Varchar,
        retry_count -> Int4,
        processing_error -> Nullable<Text>,
        rag_sources -> Jsonb,
        model -> Nullable<Varchar>,
        generation_time_ms -> Nullable<Int8>,
        tokens_prompt -> Nullable<Int4>,
        tokens_completion -> Nullable<Int4>,
        created_at -> Timestamptz,
        validated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    support_users (id) {
        id -> Uuid,
        agent_id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        receives_escalations -> Bool,
        is_super_admin -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    webhook_subscriptions (id) {
        id -> Uuid,
        owner_user_id -> Uuid,
        url -> Varchar,
        events -> Array<Text>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    delivery_attempts (id) {
        id -> Uuid,
        subscription_id -> Uuid,
        event -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        attempt -> Int4,
        last_error -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(chat_sessions -> agents (agent_id));
diesel::joinable!(chat_messages -> chat_sessions (session_id));
diesel::joinable!(support_users -> agents (agent_id));
diesel::joinable!(delivery_attempts -> webhook_subscriptions (subscription_id));

diesel::allow_tables_to_appear_in_same_query!(
    agents,
    chat_sessions,
    chat_messages,
    support_users,
    webhook_subscriptions,
    delivery_attempts,
);
